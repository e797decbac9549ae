//! The registry of loaded commands and triggers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fancy_regex::Regex;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::common::error::ConfigError;
use crate::registry::command::CommandHandler;
use crate::registry::plugin::Plugin;
use crate::registry::same_handler;
use crate::registry::trigger::{TriggerDescriptor, TriggerHandler, TriggerMatch};

/// Registry shared between the dispatcher and commands that inspect it.
pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Descriptors a plugin contributed, kept for unloading.
struct LoadedPlugin {
    name: String,
    commands: Vec<Arc<dyn CommandHandler>>,
    triggers: Vec<Arc<dyn TriggerHandler>>,
}

/// Commands keyed by name and alias, triggers in registration order.
///
/// Every name, alias and trigger token is unique; a collision is a
/// [`ConfigError`] and leaves the registry untouched.
#[derive(Default)]
pub struct Registry {
    commands: HashMap<String, Arc<dyn CommandHandler>>,
    triggers: Vec<TriggerDescriptor>,
    plugins: Vec<LoadedPlugin>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into a shared handle.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Register a command under its name and every alias.
    pub fn register_command(&mut self, handler: Arc<dyn CommandHandler>) -> Result<(), ConfigError> {
        self.check_commands(std::slice::from_ref(&handler))?;
        self.insert_command(handler);
        Ok(())
    }

    /// Register a trigger under its token.
    pub fn register_trigger(&mut self, handler: Arc<dyn TriggerHandler>) -> Result<(), ConfigError> {
        let mut compiled = self.compile_triggers(std::slice::from_ref(&handler))?;
        self.triggers.append(&mut compiled);
        Ok(())
    }

    /// Remove every name pointing at this exact command.
    ///
    /// Returns the number of names removed.
    pub fn unregister_command(&mut self, handler: &Arc<dyn CommandHandler>) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, h| !same_handler(h, handler));
        before - self.commands.len()
    }

    /// Remove this exact trigger, whatever its pattern.
    pub fn unregister_trigger(&mut self, handler: &Arc<dyn TriggerHandler>) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| !same_handler(&t.handler, handler));
        before != self.triggers.len()
    }

    /// Load every command and trigger of a plugin, or none of them.
    pub fn load_plugin(&mut self, plugin: &dyn Plugin) -> Result<(), ConfigError> {
        let name = plugin.name().to_string();
        if self.plugins.iter().any(|p| p.name == name) {
            return Err(ConfigError::DuplicatePlugin { name });
        }

        let commands = plugin.commands();
        let triggers = plugin.triggers();

        self.check_commands(&commands)?;
        let mut compiled = self.compile_triggers(&triggers)?;

        for handler in &commands {
            self.insert_command(handler.clone());
        }
        self.triggers.append(&mut compiled);

        info!(
            "Loaded plugin '{}' ({} commands, {} triggers)",
            name,
            commands.len(),
            triggers.len()
        );
        self.plugins.push(LoadedPlugin {
            name,
            commands,
            triggers,
        });
        Ok(())
    }

    /// Unload a plugin by name. Returns `false` if it was not loaded.
    pub fn unload_plugin(&mut self, name: &str) -> bool {
        let Some(index) = self.plugins.iter().position(|p| p.name == name) else {
            return false;
        };
        let plugin = self.plugins.remove(index);

        for handler in &plugin.commands {
            self.unregister_command(handler);
        }
        for handler in &plugin.triggers {
            self.unregister_trigger(handler);
        }
        info!("Unloaded plugin '{}'", name);
        true
    }

    /// Look a command up by name or alias (case-insensitive).
    pub fn lookup_command(&self, token: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands.get(&token.to_lowercase()).cloned()
    }

    /// Triggers matching `text`, in registration order.
    ///
    /// Only the first match is returned unless `multi` is set.
    pub fn match_triggers(&self, text: &str, multi: bool) -> Vec<(Arc<dyn TriggerHandler>, TriggerMatch)> {
        let mut matches = Vec::new();
        for trigger in &self.triggers {
            if let Some(found) = TriggerMatch::find(&trigger.regex, text) {
                debug!("Trigger '{}' matched", trigger.token);
                matches.push((trigger.handler.clone(), found));
                if !multi {
                    break;
                }
            }
        }
        matches
    }

    /// Primary names of all non-hidden commands, sorted.
    pub fn visible_commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .iter()
            .filter(|(key, h)| !h.descriptor().hidden && **key == h.descriptor().name.to_lowercase())
            .map(|(_, h)| h.descriptor().name.clone())
            .collect();
        names.sort();
        names
    }

    #[cfg(test)]
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }

    #[cfg(test)]
    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Reject any name colliding with the registry or within `handlers`.
    fn check_commands(&self, handlers: &[Arc<dyn CommandHandler>]) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for handler in handlers {
            for name in handler.descriptor().names() {
                let key = name.to_lowercase();
                if self.commands.contains_key(&key) || !seen.insert(key) {
                    return Err(ConfigError::DuplicateCommand {
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn insert_command(&mut self, handler: Arc<dyn CommandHandler>) {
        let names: Vec<String> = handler.descriptor().names().map(str::to_lowercase).collect();
        for name in names {
            self.commands.insert(name, handler.clone());
        }
        debug!("Registered command '{}'", handler.descriptor().name);
    }

    fn compile_triggers(&self, handlers: &[Arc<dyn TriggerHandler>]) -> Result<Vec<TriggerDescriptor>, ConfigError> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let token = handler.token().to_string();
            if self.triggers.iter().any(|t| t.token == token) || !seen.insert(token.clone()) {
                return Err(ConfigError::DuplicateTrigger { token });
            }
            let regex = Regex::new(handler.pattern()).map_err(|e| ConfigError::InvalidPattern {
                pattern: handler.pattern().to_string(),
                message: e.to_string(),
            })?;
            compiled.push(TriggerDescriptor {
                token,
                regex,
                handler: handler.clone(),
            });
        }
        Ok(compiled)
    }
}
