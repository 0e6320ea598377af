//! # Engine
//!
//! Installs every configured feature against a scanned module. A feature whose signatures are
//! missing is logged and left out; the engine itself always comes up.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::menu::{self, ClientLanguage, MenuAugmenter, ResolvedMenuNative};
use crate::scan::Scanner;
use crate::talk::{self, TalkBridge};
use crate::text::TextCodec;

/// Accessors for game singletons the engine cannot find by signature
pub struct HostBindings {
    /// UI module passed as `this` to the talk function
    pub ui_module: Box<dyn Fn() -> usize + Send + Sync>,
    /// Context menu agent
    pub context_menu_agent: Box<dyn Fn() -> usize + Send + Sync>,
    /// Addon unit manager
    pub unit_manager: Box<dyn Fn() -> usize + Send + Sync>,
}

/// Installed features; dropping the engine removes every hook
pub struct Engine {
    /// Talk bridge, if installed
    talk: Option<Arc<TalkBridge>>,
    /// Context menu augmenter, if installed
    menu: Option<Arc<MenuAugmenter>>,
}

impl Engine {
    /// Locates and installs every feature enabled in `config`
    pub fn new(
        config: &EngineConfig,
        scanner: &Scanner<'_>,
        codec: Arc<dyn TextCodec>,
        host: HostBindings,
    ) -> Self {
        let HostBindings {
            ui_module,
            context_menu_agent,
            unit_manager,
        } = host;

        let talk = if config.hooks.talk {
            report(
                "talk",
                talk::install(scanner, &config.signatures, codec, ui_module),
            )
        } else {
            debug!("talk bridge disabled");
            None
        };

        let menu = if config.hooks.context_menu {
            let installed = ResolvedMenuNative::locate(
                scanner,
                &config.signatures,
                &config.menu,
                context_menu_agent,
                unit_manager,
            )
            .and_then(|native| {
                menu::install(
                    scanner,
                    &config.signatures,
                    Arc::new(native),
                    config.menu.clone(),
                    config.language,
                )
            });
            report("context menu", installed)
        } else {
            debug!("context menu augmentation disabled");
            None
        };

        Self { talk, menu }
    }

    /// Talk bridge, `None` when disabled or not found
    pub fn talk(&self) -> Option<&Arc<TalkBridge>> {
        self.talk.as_ref()
    }

    /// Context menu augmenter, `None` when disabled or not found
    pub fn menu(&self) -> Option<&Arc<MenuAugmenter>> {
        self.menu.as_ref()
    }

    /// Switches the language of synthetic menu entries
    pub fn set_language(&self, language: ClientLanguage) {
        if let Some(menu) = &self.menu {
            menu.set_language(language);
        }
    }

    /// Removes every hook. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(talk) = self.talk.take() {
            talk::uninstall(&talk);
        }
        if let Some(menu) = self.menu.take() {
            menu::uninstall(&menu);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Logs the outcome of installing one feature
fn report<T>(feature: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(installed) => {
            info!(feature, "installed");
            Some(installed)
        }
        Err(e) if e.is_not_found() => {
            warn!(feature, "{e}, feature disabled");
            None
        }
        Err(e) => {
            error!(feature, "install failed: {e}");
            None
        }
    }
}
