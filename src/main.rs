#![warn(clippy::all)]

//! Headless fragment normalizer.
//!
//! Applies each fragment given on the command line to an in-memory map built
//! from the default configuration and prints the fragment the map would
//! write back. Malformed fragments are replaced by the default view.

// Native entry point
#[cfg(not(target_arch = "wasm32"))]
fn main() -> std::process::ExitCode {
    env_logger::init();

    match native::run(std::env::args().skip(1)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

// WASM entry point - main is not called on wasm32
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::rc::Rc;

    use fullhash_map::config::{ConfigError, MapConfig};
    use fullhash_map::hash::{DefaultHash, HashSync, LoggingHash};
    use fullhash_map::headless::{HeadlessMap, ManualHost};
    use fullhash_map::map::MapView;

    pub fn run(fragments: impl Iterator<Item = String>) -> Result<(), ConfigError> {
        let config = MapConfig::load();
        config.validate()?;

        for fragment in fragments {
            let normalized = normalize(&config, &fragment)?;
            println!("{} -> {}", fragment, normalized);
        }
        Ok(())
    }

    fn normalize(config: &MapConfig, fragment: &str) -> Result<String, ConfigError> {
        // Layers are identified by their key
        let registry = config.registry(|layer| layer.key.clone())?;

        let map = Rc::new(HeadlessMap::new(config.center, config.zoom));
        for key in &config.default_layers {
            map.add_layer(key);
        }

        let host = Rc::new(ManualHost::new(fragment));
        let sync = HashSync::attach_with(
            Some(map),
            registry,
            host.clone(),
            config.sync.options(&*host),
            LoggingHash::new(DefaultHash),
        );

        let normalized = sync.format().unwrap_or_default();
        sync.remove();
        Ok(normalized)
    }
}
