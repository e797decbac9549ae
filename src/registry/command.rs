//! Command contract.
//!
//! A command is issued explicitly with the command prefix (`!name ...`).
//! Plugins implement [`Command`]; the registry and dispatcher only see the
//! type-erased [`CommandHandler`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::bot::BotHandle;
use crate::common::error::CommandResult;
use crate::common::LineEvent;
use crate::dispatch::options::CommandArgs;
use crate::identity::Identity;

/// Help text used when a command does not provide one.
pub const DEFAULT_HELP: &str = "Sorry, no help for this command yet !";

/// Where the reply of a command goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget {
    /// Private notice to the invoker.
    Invoker,
    /// The channel the command was issued in, or the invoker for private messages.
    Channel,
}

/// Static description of a command.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub name: String,
    pub aliases: Vec<String>,
    pub requires_admin: bool,
    /// Hidden commands are left out of `help`.
    pub hidden: bool,
    pub help: String,
    pub reply_target: ReplyTarget,
}

impl CommandDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            requires_admin: false,
            hidden: false,
            help: DEFAULT_HELP.to_string(),
            reply_target: ReplyTarget::Channel,
        }
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn admin(mut self) -> Self {
        self.requires_admin = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn reply_to(mut self, target: ReplyTarget) -> Self {
        self.reply_target = target;
        self
    }

    /// Name followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// A command line addressed to the bot.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub event: Arc<LineEvent>,
    /// Command name as typed, without the prefix.
    pub name: String,
    /// Everything after the command name.
    pub raw_args: String,
}

impl Invocation {
    /// Display name of whoever issued the command.
    pub fn invoker(&self) -> &str {
        &self.event.source.nick
    }
}

/// Everything a handler can see while producing its response.
#[derive(Clone)]
pub struct CommandContext {
    pub event: Arc<LineEvent>,
    /// Resolved identity of the invoker, when an admin check resolved it.
    pub invoker: Option<Identity>,
    /// Resolved identity of the participant the handler asked about.
    pub subject: Option<Identity>,
    pub bot: BotHandle,
}

/// A command provided by a plugin.
pub trait Command: Send + Sync + 'static {
    /// Structured options produced by `parse_options`.
    type Options: Send + 'static;

    fn descriptor(&self) -> &CommandDescriptor;

    /// Turn the split arguments into options, or reject them with
    /// [`CommandError::BadOptions`](crate::common::error::CommandError::BadOptions).
    fn parse_options(&self, args: &CommandArgs, invocation: &Invocation) -> CommandResult<Self::Options>;

    /// Display name whose identity must be resolved before responding.
    fn subject(&self, _options: &Self::Options, _invocation: &Invocation) -> Option<String> {
        None
    }

    /// Ignore any cached identity for the subject and ask the authority again.
    fn force_recheck(&self) -> bool {
        false
    }

    /// Produce the reply text. An empty reply sends nothing.
    fn respond(
        &self,
        options: Self::Options,
        ctx: CommandContext,
    ) -> impl Future<Output = CommandResult<String>> + Send;
}

/// A parsed command ready to run once its subject is resolved.
pub struct PreparedCommand {
    pub subject: Option<String>,
    pub force_recheck: bool,
    run: Box<dyn FnOnce(CommandContext) -> BoxFuture<'static, CommandResult<String>> + Send>,
}

impl PreparedCommand {
    pub fn run(self, ctx: CommandContext) -> BoxFuture<'static, CommandResult<String>> {
        (self.run)(ctx)
    }
}

/// Type-erased command as stored in the registry.
pub trait CommandHandler: Send + Sync {
    fn descriptor(&self) -> &CommandDescriptor;

    fn prepare(self: Arc<Self>, args: &CommandArgs, invocation: &Invocation) -> CommandResult<PreparedCommand>;
}

impl<C: Command> CommandHandler for C {
    fn descriptor(&self) -> &CommandDescriptor {
        Command::descriptor(self)
    }

    fn prepare(self: Arc<Self>, args: &CommandArgs, invocation: &Invocation) -> CommandResult<PreparedCommand> {
        let options = self.parse_options(args, invocation)?;
        let subject = self.subject(&options, invocation);
        let force_recheck = self.force_recheck();

        Ok(PreparedCommand {
            subject,
            force_recheck,
            run: Box::new(move |ctx| async move { self.respond(options, ctx).await }.boxed()),
        })
    }
}
