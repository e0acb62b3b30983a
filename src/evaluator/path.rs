use super::Realm;
use super::types::Value;

/// Runs `f` with `condition` pushed onto the realm's path conditions,
/// popping it again before returning.
pub fn with_condition<R>(realm: &mut Realm, condition: Value, f: impl FnOnce(&mut Realm) -> R) -> R {
    realm.path_conditions.push(condition);
    let result = f(realm);
    realm.path_conditions.pop();
    result
}
