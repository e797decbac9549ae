//! Core commands: help, version, ping and the admin tools.

use std::sync::Arc;

use tracing::info;

use crate::common::error::{CommandError, CommandResult};
use crate::dispatch::options::CommandArgs;
use crate::registry::{Command, CommandContext, CommandDescriptor, CommandHandler, Invocation, Plugin};

/// `help [command]`
pub struct HelpCommand {
    descriptor: CommandDescriptor,
}

impl Command for HelpCommand {
    type Options = Option<String>;

    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn parse_options(&self, args: &CommandArgs, _invocation: &Invocation) -> CommandResult<Option<String>> {
        Ok(args.get(0).map(str::to_string))
    }

    async fn respond(&self, options: Option<String>, ctx: CommandContext) -> CommandResult<String> {
        let prefix = ctx.bot.prefix();
        let registry = ctx.bot.registry.read();

        if let Some(name) = options {
            let name = name.strip_prefix(prefix).unwrap_or(&name);
            return Ok(match registry.lookup_command(name) {
                Some(handler) => handler.descriptor().help.clone(),
                None => "No such command.".to_string(),
            });
        }

        let names: Vec<String> = registry
            .visible_commands()
            .into_iter()
            .map(|name| format!("{}{}", prefix, name))
            .collect();
        Ok(format!("Here are the currently implemented commands : {}", names.join(", ")))
    }
}

/// `version`
pub struct VersionCommand {
    descriptor: CommandDescriptor,
}

impl Command for VersionCommand {
    type Options = ();

    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn parse_options(&self, _args: &CommandArgs, _invocation: &Invocation) -> CommandResult<()> {
        Ok(())
    }

    async fn respond(&self, _options: (), ctx: CommandContext) -> CommandResult<String> {
        Ok(format!("version: {}", ctx.bot.version()))
    }
}

/// `ping`
pub struct PingCommand {
    descriptor: CommandDescriptor,
}

impl Command for PingCommand {
    type Options = ();

    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn parse_options(&self, _args: &CommandArgs, _invocation: &Invocation) -> CommandResult<()> {
        Ok(())
    }

    async fn respond(&self, _options: (), _ctx: CommandContext) -> CommandResult<String> {
        Ok("pong".to_string())
    }
}

pub struct MsgOptions {
    pub target: String,
    pub text: String,
}

/// `msg <target> <text...>`, sends as the bot and replies nothing.
pub struct MsgCommand {
    descriptor: CommandDescriptor,
}

impl Command for MsgCommand {
    type Options = MsgOptions;

    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn parse_options(&self, args: &CommandArgs, invocation: &Invocation) -> CommandResult<MsgOptions> {
        let target = args
            .get(0)
            .ok_or_else(|| CommandError::bad_options("missing target"))?;
        // Named-option splitting would eat `a=b` words of the message
        let text = invocation
            .raw_args
            .trim_start()
            .strip_prefix(target)
            .unwrap_or_default()
            .trim();
        if text.is_empty() {
            return Err(CommandError::bad_options("missing text"));
        }
        Ok(MsgOptions {
            target: target.to_string(),
            text: text.to_string(),
        })
    }

    async fn respond(&self, options: MsgOptions, ctx: CommandContext) -> CommandResult<String> {
        ctx.bot.outbound.enqueue(&options.target, &options.text);
        Ok(String::new())
    }
}

/// `unload <plugin>`
pub struct UnloadCommand {
    descriptor: CommandDescriptor,
}

impl Command for UnloadCommand {
    type Options = String;

    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn parse_options(&self, args: &CommandArgs, _invocation: &Invocation) -> CommandResult<String> {
        args.get(0)
            .map(str::to_string)
            .ok_or_else(|| CommandError::bad_options("missing plugin name"))
    }

    async fn respond(&self, name: String, ctx: CommandContext) -> CommandResult<String> {
        if ctx.bot.registry.write().unload_plugin(&name) {
            info!("Plugin {} unloaded by {}", name, ctx.event.source.nick);
            Ok(format!("Plugin {} unloaded.", name))
        } else {
            Ok(format!("No plugin named {}.", name))
        }
    }
}

/// `quit`
pub struct QuitCommand {
    descriptor: CommandDescriptor,
}

impl Command for QuitCommand {
    type Options = ();

    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn parse_options(&self, _args: &CommandArgs, _invocation: &Invocation) -> CommandResult<()> {
        Ok(())
    }

    async fn respond(&self, _options: (), ctx: CommandContext) -> CommandResult<String> {
        info!("Quit requested by {}", ctx.event.source.nick);
        ctx.bot.request_shutdown();
        Ok(String::new())
    }
}

/// The commands every bot carries.
pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        "core"
    }

    fn commands(&self) -> Vec<Arc<dyn CommandHandler>> {
        vec![
            Arc::new(HelpCommand {
                descriptor: CommandDescriptor::new("help").help("Display this help."),
            }),
            Arc::new(VersionCommand {
                descriptor: CommandDescriptor::new("version").help("Display the bot version."),
            }),
            Arc::new(PingCommand {
                descriptor: CommandDescriptor::new("ping").help("peng"),
            }),
            Arc::new(MsgCommand {
                descriptor: CommandDescriptor::new("msg")
                    .help("msg <target> <text> : say text to target.")
                    .admin(),
            }),
            Arc::new(UnloadCommand {
                descriptor: CommandDescriptor::new("unload")
                    .help("unload <plugin> : remove the commands and triggers of a plugin.")
                    .admin()
                    .hidden(),
            }),
            Arc::new(QuitCommand {
                descriptor: CommandDescriptor::new("quit").help("Leave the network.").admin().hidden(),
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handle::tests::{drain, test_handle};
    use crate::bot::BotHandle;
    use crate::common::{EventKind, LineEvent, Source};
    use crate::config::{AuthorityConfig, BotConfig};
    use crate::identity::IdentityPlugin;
    use crate::outbound::OutboundReceiver;

    fn bot() -> (BotHandle, OutboundReceiver) {
        let (bot, rx) = test_handle(BotConfig::default(), &AuthorityConfig::default());
        {
            let mut registry = bot.registry.write();
            registry.load_plugin(&CorePlugin).unwrap();
            registry.load_plugin(&IdentityPlugin).unwrap();
        }
        (bot, rx)
    }

    async fn run(bot: &BotHandle, line: &str) -> CommandResult<String> {
        let event = Arc::new(LineEvent::new(
            EventKind::ChannelMessage,
            Source::nick("luc"),
            "#chan",
            vec![line.to_string()],
        ));
        let (name, raw_args) = crate::dispatch::options::split_command_line(line, '!').unwrap();
        let invocation = Invocation {
            event: event.clone(),
            name: name.to_string(),
            raw_args: raw_args.to_string(),
        };
        let handler = bot.registry.read().lookup_command(name).unwrap();
        let prepared = handler.prepare(&CommandArgs::parse(raw_args), &invocation)?;
        let ctx = CommandContext {
            event,
            invoker: None,
            subject: None,
            bot: bot.clone(),
        };
        prepared.run(ctx).await
    }

    #[tokio::test]
    async fn test_help_lists_visible_commands() {
        let (bot, _rx) = bot();
        assert_eq!(
            run(&bot, "!help").await.unwrap(),
            "Here are the currently implemented commands : !auth, !help, !msg, !ping, !version"
        );
        assert_eq!(run(&bot, "!help !version").await.unwrap(), "Display the bot version.");
        assert_eq!(run(&bot, "!help nope").await.unwrap(), "No such command.");
    }

    #[tokio::test]
    async fn test_version_and_ping() {
        let (bot, _rx) = bot();
        assert_eq!(
            run(&bot, "!version").await.unwrap(),
            format!("version: {}", env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(run(&bot, "!ping").await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_msg_sends_verbatim_text() {
        let (bot, mut rx) = bot();
        assert_eq!(run(&bot, "!msg #other x=1 is fine").await.unwrap(), "");
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "#other");
        assert_eq!(sent[0].text, "x=1 is fine");

        assert!(matches!(
            run(&bot, "!msg #other").await,
            Err(CommandError::BadOptions(_))
        ));
    }

    #[tokio::test]
    async fn test_unload_removes_plugin_commands() {
        let (bot, _rx) = bot();
        assert_eq!(run(&bot, "!unload identity").await.unwrap(), "Plugin identity unloaded.");
        assert!(bot.registry.read().lookup_command("auth").is_none());
        assert_eq!(run(&bot, "!unload identity").await.unwrap(), "No plugin named identity.");
    }

    #[tokio::test]
    async fn test_quit_requests_shutdown() {
        let (bot, _rx) = bot();
        let shutdown = bot.subscribe_shutdown();
        assert_eq!(run(&bot, "!quit").await.unwrap(), "");
        assert!(*shutdown.borrow());
    }
}
