macro_rules! register_collectors {
    (
        $(
            $module:ident => $collector_type:ident
        ),* $(,)?
    ) => {
        // Import all collector modules
        $(
            pub mod $module;
            pub use $module::$collector_type;
        )*

        /// Factory map: collector name -> constructor. Custom query
        /// collectors are built from configuration and appended by the
        /// registry, not listed here.
        pub fn all_factories() -> HashMap<&'static str, fn() -> SharedCollector> {
            let mut map: HashMap<&'static str, fn() -> SharedCollector> = HashMap::new();
            $(
                map.insert(
                    stringify!($module),
                    || Arc::new($collector_type::new()),
                );
            )*
            map
        }

        // Generate array of collector names - this is what you need for clap!
        pub const COLLECTOR_NAMES: &[&'static str] = &[
            $(stringify!($module),)*
        ];
    };
}
