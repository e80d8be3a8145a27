//! Context propagation for initiated flows.
//!
//! Platform properties arriving on a SessionInit describe the *initiator's*
//! environment. Before an initiated flow sees them, every `corda.`-prefixed
//! key is moved under `corda.initiator.` so it cannot be mistaken for a local
//! platform setting, and local overrides are layered on top.

use flowpoint_types::context::{ContextProperties, INITIATOR_PREFIX, LocalContext, PLATFORM_PREFIX};

/// Rename platform-prefixed keys to the initiator namespace.
///
/// Keys already under `corda.initiator.` and keys outside `corda.` are kept as
/// they are, so applying the function twice gives the same result as once.
/// When a renamed key collides with a key that was already under the
/// initiator namespace, the already-marked value is kept.
pub fn rename_initiator_props(props: &ContextProperties) -> ContextProperties {
    let mut renamed = ContextProperties::new();
    let mut kept = ContextProperties::new();

    for (key, value) in props.iter() {
        if key.starts_with(INITIATOR_PREFIX) || !key.starts_with(PLATFORM_PREFIX) {
            kept.insert(key, value);
        } else {
            let suffix = &key[PLATFORM_PREFIX.len()..];
            renamed.insert(format!("{INITIATOR_PREFIX}{suffix}"), value);
        }
    }

    renamed.merge_from(&kept);
    renamed
}

/// Build the local context for a flow initiated by a remote SessionInit.
///
/// User properties pass through unchanged. Remote platform properties are
/// renamed, then `local_platform` is applied on top; a local value wins over
/// a wire value for the same key.
pub fn remote_to_local_context(
    remote_user: &ContextProperties,
    remote_platform: &ContextProperties,
    local_platform: &ContextProperties,
) -> LocalContext {
    let mut platform = rename_initiator_props(remote_platform);
    platform.merge_from(local_platform);

    LocalContext {
        user_properties: remote_user.clone(),
        session_properties: platform.to_map(),
        platform_properties: platform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> ContextProperties {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn renames_platform_keys() {
        let out = rename_initiator_props(&props(&[("corda.account", "A"), ("custom", "x")]));
        assert_eq!(out.get("corda.initiator.account"), Some("A"));
        assert_eq!(out.get("corda.account"), None);
        assert_eq!(out.get("custom"), Some("x"));
    }

    #[test]
    fn rename_is_idempotent() {
        let input = props(&[
            ("corda.account", "A"),
            ("corda.initiator.origin", "B"),
            ("other", "C"),
        ]);
        let once = rename_initiator_props(&input);
        let twice = rename_initiator_props(&once);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn already_marked_key_wins_collision() {
        let out = rename_initiator_props(&props(&[
            ("corda.foo", "renamed"),
            ("corda.initiator.foo", "marked"),
        ]));
        assert_eq!(out.get("corda.initiator.foo"), Some("marked"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn local_overrides_apply_after_rename() {
        let remote_user = props(&[("user.k", "u")]);
        let remote_platform = props(&[("corda.account", "remote"), ("corda.initiator.x", "1")]);
        let local = props(&[("corda.account", "local"), ("corda.initiator.x", "2")]);

        let ctx = remote_to_local_context(&remote_user, &remote_platform, &local);

        assert_eq!(ctx.user_properties, remote_user);
        assert_eq!(ctx.platform_properties.get("corda.initiator.account"), Some("remote"));
        assert_eq!(ctx.platform_properties.get("corda.account"), Some("local"));
        assert_eq!(ctx.platform_properties.get("corda.initiator.x"), Some("2"));
        assert_eq!(ctx.session_properties.get("corda.account").map(String::as_str), Some("local"));
        assert_eq!(ctx.session_properties.len(), ctx.platform_properties.len());
    }

    #[test]
    fn local_override_replaces_renamed_wire_value() {
        let remote_platform = props(&[("corda.foo", "A")]);
        let local = props(&[("corda.initiator.foo", "B")]);

        let ctx = remote_to_local_context(&ContextProperties::new(), &remote_platform, &local);

        assert_eq!(ctx.platform_properties, props(&[("corda.initiator.foo", "B")]));
        assert_eq!(ctx.platform_properties.get("corda.foo"), None);
        assert_eq!(
            ctx.session_properties.get("corda.initiator.foo").map(String::as_str),
            Some("B")
        );
        assert_eq!(ctx.session_properties.len(), 1);
    }

    #[test]
    fn empty_remote_context_yields_local_only() {
        let local = props(&[("corda.account", "local")]);
        let ctx = remote_to_local_context(&ContextProperties::new(), &ContextProperties::new(), &local);
        assert!(ctx.user_properties.is_empty());
        assert_eq!(ctx.platform_properties, local);
    }
}
