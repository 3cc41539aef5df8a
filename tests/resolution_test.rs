//! Resolution, linking and wrapper behaviour through the public API

use bindgraph::{
    instance, Binding, ConfigurationError, ConstructorRegistry, Dependency, Key, Lazy,
    OptionalInstance, Provider, Qualifier, ResolveError, ResolverSettings, Scope, ScopeTier,
    TypeDesc,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn key(name: &str) -> Key {
    Key::of_type(TypeDesc::named(name)).unwrap()
}

fn singleton() -> ScopeTier {
    ScopeTier::new("Singleton")
}

fn counting_binding(label: &str, calls: &Arc<AtomicUsize>) -> Binding {
    let calls = calls.clone();
    Binding::provides(label.to_string(), [], move |_| {
        Ok(instance(calls.fetch_add(1, Ordering::SeqCst)))
    })
}

#[test]
fn linking_is_idempotent() {
    let mut builder = Scope::builder([]);
    builder
        .register(key("Engine"), Binding::provides("engine", [], |_| Ok(instance(8u32))))
        .unwrap();
    builder
        .register(
            key("Car"),
            Binding::provides("car", [key("Engine").into()], |args| {
                Ok(instance(format!("car with {} cylinders", args.get::<u32>(0)?)))
            }),
        )
        .unwrap();
    let scope = builder.build().unwrap();

    let first = scope.resolve(&key("Car")).unwrap();
    let second = scope.resolve(&key("Car")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(scope.is_linked(&key("Engine")), Some(true));
    assert_eq!(
        *scope.get_as::<String>(&key("Car")).unwrap(),
        "car with 8 cylinders"
    );
}

#[test]
fn missing_binding_names_exactly_the_key() {
    let scope = Scope::builder([]).build().unwrap();
    let err = scope.resolve(&key("Foo")).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Missing binding for Foo\n * Requested: Foo\n     which was not found."
    );
    assert_eq!(err.key(), Some(&key("Foo")));
    assert!(err.chain().is_empty());
}

#[test]
fn cycle_reports_every_step_in_discovery_order() {
    let mut builder = Scope::builder([]);
    builder
        .register(key("A"), Binding::provides("a", [key("B").into()], |_| Ok(None)))
        .unwrap();
    builder
        .register(key("B"), Binding::provides("b", [key("C").into()], |_| Ok(None)))
        .unwrap();
    builder
        .register(key("C"), Binding::provides("c", [key("A").into()], |_| Ok(None)))
        .unwrap();
    let scope = builder.build().unwrap();

    let err = scope.resolve(&key("A")).unwrap_err();
    assert!(matches!(err, ResolveError::DependencyCycle { .. }));
    assert_eq!(
        err.to_string(),
        "Dependency cycle for A\n \
         * Requested: A\n     from @Provides[a]\n \
         * Requested: B\n     from @Provides[b]\n \
         * Requested: C\n     from @Provides[c]\n \
         * Requested: A\n     which forms a cycle."
    );
    // Nothing was published, so the next request fails the same way.
    assert_eq!(scope.is_linked(&key("A")), Some(false));
    assert!(scope.resolve(&key("B")).is_err());
}

#[test]
fn scoped_binding_computes_once_unscoped_every_time() {
    let scoped_calls = Arc::new(AtomicUsize::new(0));
    let unscoped_calls = Arc::new(AtomicUsize::new(0));

    let mut builder = Scope::builder([singleton()]);
    builder
        .register_scoped(key("Cached"), counting_binding("cached", &scoped_calls), &singleton())
        .unwrap();
    builder
        .register(key("Fresh"), counting_binding("fresh", &unscoped_calls))
        .unwrap();
    let scope = builder.build().unwrap();

    for _ in 0..3 {
        scope.get(&key("Cached")).unwrap();
        scope.get(&key("Fresh")).unwrap();
    }
    assert_eq!(scoped_calls.load(Ordering::SeqCst), 1);
    assert_eq!(unscoped_calls.load(Ordering::SeqCst), 3);

    let a = scope.get_as::<usize>(&key("Cached")).unwrap();
    let b = scope.get_as::<usize>(&key("Cached")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn scoped_absent_value_is_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let mut builder = Scope::builder([singleton()]);
    builder
        .register_scoped(
            key("Nothing"),
            Binding::provides("nothing", [], move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }),
            &singleton(),
        )
        .unwrap();
    let scope = builder.build().unwrap();

    assert!(scope.get(&key("Nothing")).unwrap().is_none());
    assert!(scope.get(&key("Nothing")).unwrap().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn binds_aliases_the_target_binding() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Scope::builder([singleton()]);
    builder
        .register_scoped(key("Dog"), counting_binding("dog", &calls), &singleton())
        .unwrap();
    builder
        .register(key("Animal"), Binding::binds("Dog.bind", key("Dog")))
        .unwrap();
    let scope = builder.build().unwrap();

    let animal = scope.resolve(&key("Animal")).unwrap();
    let dog = scope.resolve(&key("Dog")).unwrap();
    assert!(Arc::ptr_eq(&animal, &dog));
    assert!(Arc::ptr_eq(
        &scope.get_as::<usize>(&key("Animal")).unwrap(),
        &scope.get_as::<usize>(&key("Dog")).unwrap()
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn qualifiers_separate_bindings_of_one_type() {
    let home = Key::qualified(Qualifier::named("home"), TypeDesc::named("String")).unwrap();
    let work = Key::qualified(Qualifier::named("work"), TypeDesc::named("String")).unwrap();

    let mut builder = Scope::builder([]);
    builder.register_instance(home.clone(), String::from("Lisbon")).unwrap();
    builder.register_instance(work.clone(), String::from("Porto")).unwrap();
    let scope = builder.build().unwrap();

    assert_eq!(*scope.get_as::<String>(&home).unwrap(), "Lisbon");
    assert_eq!(*scope.get_as::<String>(&work).unwrap(), "Porto");
    let err = scope.resolve(&key("String")).unwrap_err();
    assert!(matches!(err, ResolveError::MissingBinding { .. }));
}

#[test]
fn provider_recomputes_and_lazy_memoizes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Scope::builder([]);
    builder.register(key("Ticket"), counting_binding("ticket", &calls)).unwrap();
    let scope = builder.build().unwrap();

    let provider_key = Key::of_type(TypeDesc::provider_of(TypeDesc::named("Ticket"))).unwrap();
    let provider = scope.get_as::<Provider>(&provider_key).unwrap();
    assert_eq!(*provider.get_as::<usize>().unwrap(), 0);
    assert_eq!(*provider.get_as::<usize>().unwrap(), 1);

    let lazy_key = Key::of_type(TypeDesc::lazy_of(TypeDesc::named("Ticket"))).unwrap();
    let lazy = scope.get_as::<Lazy>(&lazy_key).unwrap();
    assert!(!lazy.is_initialized());
    assert_eq!(*lazy.get_as::<usize>().unwrap(), 2);
    assert_eq!(*lazy.get_as::<usize>().unwrap(), 2);

    // Each request for Lazy<T> hands out a fresh, uninitialized lazy.
    let another = scope.get_as::<Lazy>(&lazy_key).unwrap();
    assert!(!another.is_initialized());
    assert_eq!(*another.get_as::<usize>().unwrap(), 3);

    // Intrinsic wrappers are never stored.
    assert!(!scope.contains_key(&provider_key));
    assert!(!scope.contains_key(&lazy_key));
}

#[test]
fn provider_dependency_breaks_construction_order() {
    let mut builder = Scope::builder([]);
    builder
        .register(
            key("Parent"),
            Binding::provides(
                "parent",
                [Key::of_type(TypeDesc::provider_of(TypeDesc::named("Child"))).unwrap().into()],
                |args| {
                    let child = args.provider(0)?;
                    Ok(instance(format!("parent of {}", child.get_as::<String>()?)))
                },
            ),
        )
        .unwrap();
    builder
        .register(
            key("Child"),
            Binding::provides("child", [], |_| Ok(instance(String::from("child")))),
        )
        .unwrap();
    let scope = builder.build().unwrap();
    assert_eq!(*scope.get_as::<String>(&key("Parent")).unwrap(), "parent of child");
}

#[test]
fn provider_for_missing_key_fails_on_get() {
    let scope = Scope::builder([]).build().unwrap();
    let provider = scope.provider(key("Ghost"));
    let err = provider.get().unwrap_err();
    assert!(matches!(err, ResolveError::MissingBinding { .. }));
}

#[test]
fn optional_binding_semantics() {
    let optional_of = |name: &str| Key::of_type(TypeDesc::optional_of(TypeDesc::named(name))).unwrap();

    let mut builder = Scope::builder([]);
    builder.register(optional_of("Absent"), Binding::optional(key("Absent"))).unwrap();
    builder.register(optional_of("Present"), Binding::optional(key("Present"))).unwrap();
    builder.register_instance(key("Present"), 5i32).unwrap();
    builder.register(optional_of("Null"), Binding::optional(key("Null"))).unwrap();
    builder.register_absent(key("Null")).unwrap();
    let scope = builder.build().unwrap();

    let absent = scope.get_as::<OptionalInstance>(&optional_of("Absent")).unwrap();
    assert!(!absent.is_present());

    let present = scope.get_as::<OptionalInstance>(&optional_of("Present")).unwrap();
    assert_eq!(*present.get_as::<i32>().unwrap().unwrap(), 5);

    let err = scope.get(&optional_of("Null")).unwrap_err();
    assert!(matches!(err, ResolveError::NullabilityViolation { .. }));
    assert!(err.to_string().contains("@BindsInstance[absent]"));
}

#[test]
fn optional_dependency_without_binding_is_absent() {
    let mut builder = Scope::builder([]);
    builder
        .register(
            key("Report"),
            Binding::provides("report", [Dependency::optional(key("Footer"))], |args| {
                let footer = args.optional::<String>(0)?;
                Ok(instance(footer.map_or(0, |f| f.len())))
            }),
        )
        .unwrap();
    let scope = builder.build().unwrap();
    assert_eq!(*scope.get_as::<usize>(&key("Report")).unwrap(), 0);
}

#[test]
fn factory_errors_are_wrapped_with_the_binding() {
    let mut builder = Scope::builder([]);
    builder
        .register(
            key("Flaky"),
            Binding::provides("flaky", [], |_| Err("connection refused".into())),
        )
        .unwrap();
    let scope = builder.build().unwrap();

    let err = scope.get(&key("Flaky")).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to create value from @Provides[flaky]: connection refused"
    );
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn get_as_reports_type_mismatch_and_absence() {
    let mut builder = Scope::builder([]);
    builder.register_instance(key("Number"), 1u64).unwrap();
    builder.register_absent(key("Nothing")).unwrap();
    let scope = builder.build().unwrap();

    assert!(matches!(
        scope.get_as::<String>(&key("Number")),
        Err(ResolveError::TypeMismatch { .. })
    ));
    assert!(matches!(
        scope.get_as::<u64>(&key("Nothing")),
        Err(ResolveError::NullabilityViolation { .. })
    ));
    assert!(scope.get(&key("Nothing")).unwrap().is_none());
}

#[test]
fn late_instance_allows_self_reference() {
    struct App {
        name: String,
    }

    let mut builder = Scope::builder([]);
    let late = builder.register_late(key("App")).unwrap();
    builder
        .register(
            key("Banner"),
            Binding::provides("banner", [key("App").into()], |args| {
                Ok(instance(format!("welcome to {}", args.get::<App>(0)?.name)))
            }),
        )
        .unwrap();
    let scope = builder.build().unwrap();

    let err = scope.get(&key("Banner")).unwrap_err();
    assert!(err.to_string().contains("@LateInstance[App] was used before its value was set"));

    late.set_instance(App { name: "bindgraph".into() }).unwrap();
    assert_eq!(*scope.get_as::<String>(&key("Banner")).unwrap(), "welcome to bindgraph");
    assert!(matches!(
        late.set_instance(App { name: "again".into() }),
        Err(ResolveError::LateInstanceAlreadySet { .. })
    ));
}

#[test]
fn child_scopes_see_parent_bindings_and_may_shadow_them() {
    let mut root = Scope::builder([singleton()]);
    root.register_instance(key("Region"), String::from("eu")).unwrap();
    root.register_instance(key("Mode"), String::from("root")).unwrap();
    let root = root.build().unwrap();

    let mut child = root.child_builder([ScopeTier::new("Request")]).unwrap();
    child.register_instance(key("Mode"), String::from("child")).unwrap();
    let child = child.build().unwrap();

    assert_eq!(*child.get_as::<String>(&key("Region")).unwrap(), "eu");
    assert_eq!(*child.get_as::<String>(&key("Mode")).unwrap(), "child");
    assert_eq!(*root.get_as::<String>(&key("Mode")).unwrap(), "root");
    assert!(Arc::ptr_eq(child.parent().unwrap(), &root));
}

#[test]
fn shadowed_key_reached_through_parent_is_not_a_cycle() {
    let mut root = Scope::builder([]);
    root.register_instance(key("Foo"), String::from("parent")).unwrap();
    root.register(
        key("Bar"),
        Binding::provides("bar", [key("Foo").into()], |args| {
            Ok(instance(format!("bar({})", args.get::<String>(0)?)))
        }),
    )
    .unwrap();
    let root = root.build().unwrap();

    let mut child = root.child_builder([]).unwrap();
    child
        .register(
            key("Foo"),
            Binding::provides("childFoo", [key("Bar").into()], |args| {
                Ok(instance(format!("child<{}>", args.get::<String>(0)?)))
            }),
        )
        .unwrap();
    let child = child.build().unwrap();

    assert_eq!(*child.get_as::<String>(&key("Foo")).unwrap(), "child<bar(parent)>");
    assert_eq!(*root.get_as::<String>(&key("Foo")).unwrap(), "parent");
}

#[test]
fn cycle_within_a_child_scope_is_still_detected() {
    let root = Scope::builder([]).build().unwrap();
    let mut child = root.child_builder([]).unwrap();
    child
        .register(key("A"), Binding::provides("a", [key("B").into()], |_| Ok(None)))
        .unwrap();
    child
        .register(key("B"), Binding::provides("b", [key("A").into()], |_| Ok(None)))
        .unwrap();
    let child = child.build().unwrap();

    let err = child.resolve(&key("A")).unwrap_err();
    assert!(matches!(err, ResolveError::DependencyCycle { .. }));
    assert_eq!(err.chain().len(), 2);
}

#[test]
fn explicit_provider_entry_shadows_the_intrinsic_provider() {
    let provider_key = Key::of_type(TypeDesc::provider_of(TypeDesc::named("Ticket"))).unwrap();
    let mut builder = Scope::builder([]);
    builder.register_instance(key("Ticket"), 1u32).unwrap();
    builder
        .register_instance(provider_key.clone(), String::from("custom provider"))
        .unwrap();
    let scope = builder.build().unwrap();

    assert_eq!(*scope.get_as::<String>(&provider_key).unwrap(), "custom provider");
    assert!(scope.get_as::<Provider>(&provider_key).is_err());

    // Without an explicit entry the intrinsic indirection is used.
    let lazy_key = Key::of_type(TypeDesc::lazy_of(TypeDesc::named("Ticket"))).unwrap();
    assert_eq!(*scope.get_as::<Lazy>(&lazy_key).unwrap().get_as::<u32>().unwrap(), 1);
}

#[test]
fn constructor_registry_supplies_just_in_time_bindings() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();

    let mut registry = ConstructorRegistry::new();
    registry
        .register_scoped(TypeDesc::named("Pool"), singleton(), [], move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(instance(String::from("pool")))
        })
        .unwrap();
    registry
        .register(TypeDesc::named("Handler"), [key("Pool").into()], |args| {
            Ok(instance(format!("handler using {}", args.get::<String>(0)?)))
        })
        .unwrap();

    let root = Scope::builder([singleton()])
        .just_in_time(registry.into_strategy())
        .build()
        .unwrap();
    let request = root.new_child([ScopeTier::new("Request")], None).unwrap();

    assert_eq!(
        *request.get_as::<String>(&key("Handler")).unwrap(),
        "handler using pool"
    );
    request.get(&key("Handler")).unwrap();
    root.get(&key("Pool")).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The unscoped handler lives where it was requested, the pool in the root.
    assert!(request.contains_key(&key("Handler")));
    assert!(root.contains_key(&key("Pool")));
    assert!(!request.contains_key(&key("Pool")));

    let qualified = Key::qualified(Qualifier::new("@Primary"), TypeDesc::named("Pool")).unwrap();
    assert!(matches!(
        request.resolve(&qualified),
        Err(ResolveError::MissingBinding { .. })
    ));
}

#[test]
fn just_in_time_can_be_disabled_by_settings() {
    let mut registry = ConstructorRegistry::new();
    registry
        .register(TypeDesc::named("Clock"), [], |_| Ok(instance(0u64)))
        .unwrap();

    let mut settings = ResolverSettings::default();
    settings.linking.just_in_time = false;
    let scope = Scope::builder([])
        .with_settings(settings)
        .just_in_time(registry.into_strategy())
        .build()
        .unwrap();

    assert!(matches!(
        scope.resolve(&key("Clock")),
        Err(ResolveError::MissingBinding { .. })
    ));
    assert_eq!(scope.stats().jit_lookups, 0);
}

#[test]
fn stats_track_resolution_work() {
    let mut builder = Scope::builder([]);
    builder.register(key("A"), Binding::provides("a", [key("B").into()], |_| Ok(None))).unwrap();
    builder.register(key("B"), Binding::provides("b", [], |_| Ok(None))).unwrap();
    let scope = builder.build().unwrap();

    scope.resolve(&key("A")).unwrap();
    scope.resolve(&key("A")).unwrap();
    let stats = scope.stats();
    assert_eq!(stats.resolutions, 2);
    assert_eq!(stats.links, 2);
    assert_eq!(stats.races_lost, 0);

    let mut settings = ResolverSettings::default();
    settings.stats.enabled = false;
    let quiet = Scope::builder([]).with_settings(settings).build().unwrap();
    let _ = quiet.resolve(&key("A"));
    assert_eq!(quiet.stats().resolutions, 0);
}

#[test]
fn type_variables_never_become_keys() {
    let err = Key::of_type(TypeDesc::map_of(TypeDesc::named("String"), TypeDesc::variable("V")))
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::UnresolvedTypeVariable { .. }));
}
