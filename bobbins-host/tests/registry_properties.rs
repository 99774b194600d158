//! Property-based tests for slot capacity.

use bobbins_host::*;
use proptest::prelude::*;

fn plugin_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["alpha", "beta", "gamma"]).prop_map(str::to_string)
}

fn contribution_strategy() -> impl Strategy<Value = (String, String)> {
    (plugin_strategy(), prop::string::string_regex("[a-z]{1,6}").unwrap())
}

proptest! {
    /// A capped slot never holds more than its maximum, and every refusal is
    /// a capacity error.
    #[test]
    fn capped_slot_never_overflows(
        max in 1usize..6,
        attempts in prop::collection::vec(contribution_strategy(), 0..30),
    ) {
        let registry = ExtensionRegistry::new();
        registry.register_slot(
            SlotDefinition::new("test.capped", "Capped", ["panel"]).with_max_contributions(max),
        );

        for (plugin, id) in &attempts {
            let before = registry.registered_count("test.capped");
            match registry.register_extension(plugin, ExtensionContribution::new(id.clone(), "test.capped", "panel")) {
                Ok(RegisterOutcome::Registered) => prop_assert_eq!(registry.registered_count("test.capped"), before + 1),
                Ok(RegisterOutcome::AlreadyRegistered) => prop_assert_eq!(registry.registered_count("test.capped"), before),
                Err(HostError::SlotCapacityExceeded { max: reported, .. }) => {
                    prop_assert_eq!(reported, max);
                    prop_assert_eq!(before, max);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
            prop_assert!(registry.registered_count("test.capped") <= max);
        }
    }

    /// Removing a plugin removes exactly its extensions.
    #[test]
    fn unregister_plugin_is_scoped(
        attempts in prop::collection::vec(contribution_strategy(), 0..20),
        victim in plugin_strategy(),
    ) {
        let registry = ExtensionRegistry::new();
        for (plugin, id) in &attempts {
            registry
                .register_extension(plugin, ExtensionContribution::new(id.clone(), slot_ids::LEFT_PANEL, "panel"))
                .unwrap();
        }
        let survivors: Vec<String> = ["alpha", "beta", "gamma"]
            .iter()
            .filter(|p| **p != victim)
            .flat_map(|p| registry.get_extensions_for_plugin(p))
            .map(|e| e.id)
            .collect();

        registry.unregister_plugin(&victim);

        prop_assert!(registry.get_extensions_for_plugin(&victim).is_empty());
        for id in survivors {
            prop_assert!(registry.get_extension(&id).is_some());
        }
    }
}
