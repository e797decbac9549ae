//! Commands backed by the identity resolver.

use std::sync::Arc;

use crate::common::error::CommandResult;
use crate::dispatch::options::CommandArgs;
use crate::registry::{Command, CommandContext, CommandDescriptor, CommandHandler, Invocation, Plugin};

/// `auth [nick]`: report the account of a participant, checking again.
pub struct AuthCommand {
    descriptor: CommandDescriptor,
}

impl AuthCommand {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new("auth")
                .help("auth [nick] : tell the auth status of nick with the authority, also force the check."),
        }
    }
}

impl Default for AuthCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for AuthCommand {
    type Options = Option<String>;

    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn parse_options(&self, args: &CommandArgs, _invocation: &Invocation) -> CommandResult<Option<String>> {
        Ok(args.get(0).map(str::to_string))
    }

    fn subject(&self, options: &Option<String>, invocation: &Invocation) -> Option<String> {
        Some(options.clone().unwrap_or_else(|| invocation.invoker().to_string()))
    }

    fn force_recheck(&self) -> bool {
        true
    }

    async fn respond(&self, _options: Option<String>, ctx: CommandContext) -> CommandResult<String> {
        let Some(subject) = ctx.subject else {
            return Ok(String::new());
        };
        Ok(match subject.account {
            Some(account) => format!("{} is authed as {}.", subject.nick, account),
            None => format!("{} is not authed.", subject.nick),
        })
    }
}

/// Plugin exposing the identity commands.
pub struct IdentityPlugin;

impl Plugin for IdentityPlugin {
    fn name(&self) -> &str {
        "identity"
    }

    fn commands(&self) -> Vec<Arc<dyn CommandHandler>> {
        vec![Arc::new(AuthCommand::new())]
    }
}
