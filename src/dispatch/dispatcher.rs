//! Event dispatcher.
//!
//! Every inbound event is classified on the dispatch task, in arrival
//! order. Participant bookkeeping and authority answers are applied right
//! away. Commands and triggers run on their own task: they may wait on the
//! identity resolver, and the dispatch loop never does.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bot::BotHandle;
use crate::common::error::{CommandError, CommandResult};
use crate::common::{EventKind, LineEvent};
use crate::config::RateLimitConfig;
use crate::dispatch::options::{split_command_line, CommandArgs};
use crate::dispatch::rate::{InvocationRate, RateDecision};
use crate::registry::{
    CommandContext, CommandDescriptor, Invocation, PreparedCommand, ReplyTarget, TriggerHandler, TriggerMatch,
};

/// Reply to handler faults.
pub const INTERNAL_FAILURE: &str = "Something went wrong, sorry.";

const SWEEP_PERIOD: Duration = Duration::from_secs(60);
/// How long resolutions of participants outside every shared channel are kept.
const STRANGER_TTL: Duration = Duration::from_secs(600);

/// What the dispatcher did with an event.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Nothing to do.
    Ignored,
    /// Participant bookkeeping or an authority answer.
    Tracked,
    /// Command over the invoker's rate; the handler never ran.
    RateDenied,
    /// Options rejected; help was sent instead.
    Rejected,
    /// Command running on its own task.
    Command(JoinHandle<()>),
    /// Matching triggers running on their own tasks.
    Triggers(Vec<JoinHandle<()>>),
}

impl DispatchOutcome {
    /// Wait for the spawned handlers, if any.
    pub async fn finished(self) {
        let handles = match self {
            DispatchOutcome::Command(handle) => vec![handle],
            DispatchOutcome::Triggers(handles) => handles,
            _ => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Handler task failed: {}", e);
            }
        }
    }
}

pub struct Dispatcher {
    bot: BotHandle,
    rate: InvocationRate,
}

impl Dispatcher {
    pub fn new(bot: BotHandle, rate: &RateLimitConfig) -> Self {
        Self {
            bot,
            rate: InvocationRate::new(rate),
        }
    }

    /// Dispatch events until the channel closes or shutdown is requested.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<LineEvent>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut sweep = tokio::time::interval(SWEEP_PERIOD);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.dispatch(event);
                    }
                    None => {
                        info!("Event channel closed, dispatcher stopping");
                        break;
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Dispatcher shutting down");
                        break;
                    }
                }
                _ = sweep.tick() => self.sweep(),
            }
        }
    }

    /// Drop identities and rate counters nobody needs anymore.
    pub fn sweep(&self) {
        let identities = self.bot.identity.prune(STRANGER_TTL);
        let counters = self.rate.prune();
        if identities + counters > 0 {
            debug!("Swept {} identities and {} rate counters", identities, counters);
        }
    }

    /// Handle one inbound event.
    pub fn dispatch(&self, event: LineEvent) -> DispatchOutcome {
        info!(
            target: "messages",
            "<<< {} {} {} - {}",
            event.kind.as_str(),
            event.source,
            event.target,
            event.arguments.join(" ")
        );
        let nick = event.source.nick.as_str();

        match event.kind {
            EventKind::Welcome => {
                // A new session: nothing seen before it can be trusted
                self.bot.identity.reset();
                self.rate.clear();
                self.bot.identity.authenticate();
                DispatchOutcome::Tracked
            }
            EventKind::Join => {
                self.bot.identity.on_join(nick, &event.target);
                DispatchOutcome::Tracked
            }
            EventKind::Part => {
                if self.bot.identity.on_part(nick, &event.target) {
                    self.rate.forget(nick);
                }
                DispatchOutcome::Tracked
            }
            EventKind::NickChange => {
                self.bot.identity.on_nick_change(nick, &event.target);
                self.rate.rename(nick, &event.target);
                DispatchOutcome::Tracked
            }
            EventKind::Quit => {
                self.bot.identity.on_quit(nick);
                self.rate.forget(nick);
                DispatchOutcome::Tracked
            }
            EventKind::NamesReply => {
                if let [_, channel, names, ..] = event.arguments.as_slice() {
                    self.bot.identity.on_names(channel, names);
                }
                DispatchOutcome::Tracked
            }
            EventKind::Notice => {
                if self.bot.identity.handle_notice(nick, event.text()) {
                    return DispatchOutcome::Tracked;
                }
                self.dispatch_triggers(Arc::new(event))
            }
            EventKind::ChannelMessage | EventKind::PrivateMessage => {
                let prefix = self.bot.prefix();
                match split_command_line(event.text(), prefix) {
                    Some((name, raw_args)) => {
                        let (name, raw_args) = (name.to_string(), raw_args.to_string());
                        self.dispatch_command(Arc::new(event), name, raw_args)
                    }
                    None => self.dispatch_triggers(Arc::new(event)),
                }
            }
        }
    }

    fn dispatch_command(&self, event: Arc<LineEvent>, name: String, raw_args: String) -> DispatchOutcome {
        let invoker = event.source.nick.as_str();
        let Some(handler) = self.bot.registry.read().lookup_command(&name) else {
            debug!("Unknown command {} from {}", name, invoker);
            return DispatchOutcome::Ignored;
        };

        if let RateDecision::Denied { count } = self.rate.check(invoker) {
            warn!("Flood attempt by {} ({} commands in window)", invoker, count);
            if self.bot.config.answer_rate_denied {
                self.bot.outbound.enqueue_notice(invoker, &self.bot.config.rate_denied_notice);
            }
            return DispatchOutcome::RateDenied;
        }

        let descriptor = handler.descriptor().clone();
        let invocation = Invocation {
            event: event.clone(),
            name,
            raw_args,
        };
        let args = CommandArgs::parse(&invocation.raw_args);

        let prepared = match handler.prepare(&args, &invocation) {
            Ok(prepared) => prepared,
            Err(err) => {
                debug!("{} sent bad options to {}: {}", invoker, descriptor.name, err);
                let reply = error_reply(&descriptor.help, &err);
                self.bot.reply(&event, descriptor.reply_target, &reply);
                return DispatchOutcome::Rejected;
            }
        };

        let bot = self.bot.clone();
        DispatchOutcome::Command(tokio::spawn(run_command(bot, event, descriptor, prepared)))
    }

    fn dispatch_triggers(&self, event: Arc<LineEvent>) -> DispatchOutcome {
        let text = event.text();
        if text.is_empty() || text.starts_with(self.bot.prefix()) {
            return DispatchOutcome::Ignored;
        }

        let matches = self
            .bot
            .registry
            .read()
            .match_triggers(text, self.bot.config.multi_trigger);
        if matches.is_empty() {
            return DispatchOutcome::Ignored;
        }

        let handles = matches
            .into_iter()
            .map(|(handler, matched)| tokio::spawn(run_trigger(self.bot.clone(), event.clone(), handler, matched)))
            .collect();
        DispatchOutcome::Triggers(handles)
    }
}

async fn run_command(bot: BotHandle, event: Arc<LineEvent>, descriptor: CommandDescriptor, prepared: PreparedCommand) {
    let invoker_nick = event.source.nick.clone();

    let mut invoker = None;
    if descriptor.requires_admin {
        let identity = bot.identity.resolve(&invoker_nick, false).await;
        if !bot.is_admin(&identity) {
            warn!(
                "{} (account {:?}) is not allowed to run {}",
                invoker_nick, identity.account, descriptor.name
            );
            bot.reply(&event, descriptor.reply_target, &bot.config.admin_denied());
            return;
        }
        invoker = Some(identity);
    }

    let subject = match prepared.subject.as_deref() {
        Some(nick) => Some(bot.identity.resolve(nick, prepared.force_recheck).await),
        None => None,
    };

    let ctx = CommandContext {
        event: event.clone(),
        invoker,
        subject,
        bot: bot.clone(),
    };
    let result = guarded(prepared.run(ctx)).await;

    let context = format!("command {} from {}", descriptor.name, invoker_nick);
    if let Some(reply) = settle(&context, &descriptor.help, result) {
        bot.reply(&event, descriptor.reply_target, &reply);
    }
}

async fn run_trigger(bot: BotHandle, event: Arc<LineEvent>, handler: Arc<dyn TriggerHandler>, matched: TriggerMatch) {
    let subject = match handler.subject(&matched) {
        Some(nick) => Some(bot.identity.resolve(&nick, false).await),
        None => None,
    };

    let ctx = CommandContext {
        event: event.clone(),
        invoker: None,
        subject,
        bot: bot.clone(),
    };
    let context = format!("trigger {} on {}", handler.token(), event.source.nick);
    let result = guarded(handler.fire(matched, ctx)).await;

    if let Some(reply) = settle(&context, "", result) {
        bot.reply(&event, ReplyTarget::Channel, &reply);
    }
}

type Guarded = Result<CommandResult<String>, Box<dyn Any + Send>>;

/// Run a handler future, catching panics.
async fn guarded(future: BoxFuture<'static, CommandResult<String>>) -> Guarded {
    AssertUnwindSafe(future).catch_unwind().await
}

/// Turn a handler outcome into the reply text, logging faults.
fn settle(context: &str, help: &str, result: Guarded) -> Option<String> {
    match result {
        Ok(Ok(text)) if text.is_empty() => None,
        Ok(Ok(text)) => Some(text),
        Ok(Err(err)) => {
            if err.is_expected() {
                debug!("{} ended with {}", context, err);
            } else {
                error!("{} failed: {:#}", context, err);
            }
            Some(error_reply(help, &err))
        }
        Err(panic) => {
            error!("{} panicked: {}", context, panic_message(panic.as_ref()));
            Some(INTERNAL_FAILURE.to_string())
        }
    }
}

/// User-facing text for a handler error.
pub fn error_reply(help: &str, err: &CommandError) -> String {
    match err {
        CommandError::BadOptions(message) if message.is_empty() => help.to_string(),
        CommandError::BadOptions(message) if help.is_empty() => format!("Bad command line - {}", message),
        CommandError::BadOptions(message) => format!("Bad command line - {}\n{}", message, help),
        CommandError::Unsafe(message) => message.clone(),
        CommandError::Timeout => "Timed out, try again later.".to_string(),
        CommandError::NotImplemented => "Not implemented. Sorry !".to_string(),
        CommandError::Internal(_) => INTERNAL_FAILURE.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bot::handle::tests::{drain, test_handle};
    use crate::common::{Delivery, Source};
    use crate::config::{AuthorityConfig, BotConfig};
    use crate::outbound::OutboundReceiver;
    use crate::identity::resolver::QueryState;
    use crate::registry::trigger::Trigger;
    use crate::registry::{Command, Plugin};

    /// `who [nick]`: reports the account of nick, or of the invoker.
    struct WhoCommand(CommandDescriptor);

    impl Command for WhoCommand {
        type Options = Option<String>;

        fn descriptor(&self) -> &CommandDescriptor {
            &self.0
        }

        fn parse_options(&self, args: &CommandArgs, _invocation: &Invocation) -> CommandResult<Option<String>> {
            Ok(args.get(0).map(str::to_string))
        }

        fn subject(&self, options: &Option<String>, invocation: &Invocation) -> Option<String> {
            Some(options.clone().unwrap_or_else(|| invocation.invoker().to_string()))
        }

        async fn respond(&self, _options: Option<String>, ctx: CommandContext) -> CommandResult<String> {
            let subject = ctx.subject.ok_or(CommandError::Timeout)?;
            Ok(format!(
                "{}: {}",
                subject.nick,
                subject.account.as_deref().unwrap_or("none")
            ))
        }
    }

    /// `echo <text>`; admin-only when built with `admin`.
    struct EchoCommand(CommandDescriptor);

    impl Command for EchoCommand {
        type Options = String;

        fn descriptor(&self) -> &CommandDescriptor {
            &self.0
        }

        fn parse_options(&self, args: &CommandArgs, _invocation: &Invocation) -> CommandResult<String> {
            if args.positional.is_empty() {
                return Err(CommandError::bad_options("nothing to echo"));
            }
            Ok(args.rest(0))
        }

        async fn respond(&self, options: String, _ctx: CommandContext) -> CommandResult<String> {
            Ok(options)
        }
    }

    /// `fail [panic]`
    struct FailCommand(CommandDescriptor);

    impl Command for FailCommand {
        type Options = bool;

        fn descriptor(&self) -> &CommandDescriptor {
            &self.0
        }

        fn parse_options(&self, args: &CommandArgs, _invocation: &Invocation) -> CommandResult<bool> {
            Ok(args.get(0) == Some("panic"))
        }

        async fn respond(&self, panic: bool, _ctx: CommandContext) -> CommandResult<String> {
            if panic {
                panic!("handler exploded");
            }
            Err(anyhow::anyhow!("backend unavailable").into())
        }
    }

    struct GreetTrigger;

    impl Trigger for GreetTrigger {
        fn token(&self) -> &str {
            "greet"
        }

        fn pattern(&self) -> &str {
            r"(?i)\bhello\b"
        }

        async fn respond(&self, _matched: TriggerMatch, ctx: CommandContext) -> CommandResult<String> {
            Ok(format!("Hello {}!", ctx.event.source.nick))
        }
    }

    /// Vouches for the account behind a display name.
    struct VouchTrigger;

    impl Trigger for VouchTrigger {
        fn token(&self) -> &str {
            "vouch"
        }

        fn pattern(&self) -> &str {
            r"^vouch for (?P<username>\S+)$"
        }

        fn subject(&self, matched: &TriggerMatch) -> Option<String> {
            matched.name("username").map(str::to_string)
        }

        async fn respond(&self, _matched: TriggerMatch, ctx: CommandContext) -> CommandResult<String> {
            let subject = ctx.subject.ok_or(CommandError::Timeout)?;
            Ok(format!(
                "{} is {}",
                subject.nick,
                subject.account.as_deref().unwrap_or("not authed")
            ))
        }
    }

    struct TestPlugin;

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            "test"
        }

        fn commands(&self) -> Vec<Arc<dyn crate::registry::CommandHandler>> {
            vec![
                Arc::new(WhoCommand(CommandDescriptor::new("who").help("who [nick]"))),
                Arc::new(EchoCommand(CommandDescriptor::new("echo").help("echo <text>"))),
                Arc::new(EchoCommand(CommandDescriptor::new("secret").admin())),
                Arc::new(EchoCommand(
                    CommandDescriptor::new("whisper").reply_to(ReplyTarget::Invoker),
                )),
                Arc::new(FailCommand(CommandDescriptor::new("fail"))),
            ]
        }

        fn triggers(&self) -> Vec<Arc<dyn TriggerHandler>> {
            vec![Arc::new(GreetTrigger), Arc::new(VouchTrigger)]
        }
    }

    fn authority() -> AuthorityConfig {
        AuthorityConfig {
            account: "Q@CServe.quakenet.org".to_string(),
            ..AuthorityConfig::default()
        }
    }

    fn dispatcher(config: BotConfig, authority: &AuthorityConfig) -> (Dispatcher, OutboundReceiver) {
        let (bot, rx) = test_handle(config, authority);
        bot.registry.write().load_plugin(&TestPlugin).unwrap();
        let rate = RateLimitConfig::default();
        (Dispatcher::new(bot, &rate), rx)
    }

    fn say(nick: &str, target: &str, text: &str) -> LineEvent {
        let kind = if target.starts_with('#') {
            EventKind::ChannelMessage
        } else {
            EventKind::PrivateMessage
        };
        LineEvent::new(kind, Source::nick(nick), target, vec![text.to_string()])
    }

    fn notice(nick: &str, text: &str) -> LineEvent {
        LineEvent::new(EventKind::Notice, Source::nick(nick), "notabot", vec![text.to_string()])
    }

    fn texts(rx: &mut OutboundReceiver) -> Vec<(String, String)> {
        drain(rx).into_iter().map(|m| (m.target, m.text)).collect()
    }

    fn pair(target: &str, text: &str) -> (String, String) {
        (target.to_string(), text.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_authority_runs_command_after_timeout() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &authority());

        let outcome = dispatcher.dispatch(say("dan", "#chan", "!who"));
        assert!(matches!(outcome, DispatchOutcome::Command(_)));

        let start = tokio::time::Instant::now();
        outcome.finished().await;
        assert!(start.elapsed() >= Duration::from_secs(5));

        assert_eq!(
            texts(&mut rx),
            vec![pair("Q@CServe.quakenet.org", "WHOIS dan"), pair("#chan", "dan: none")]
        );
    }

    #[tokio::test]
    async fn test_two_invokers_share_one_query() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &authority());

        let first = dispatcher.dispatch(say("alice", "#chan", "!who carol"));
        let second = dispatcher.dispatch(say("bob", "#chan", "!who carol"));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(texts(&mut rx), vec![pair("Q@CServe.quakenet.org", "WHOIS carol")]);

        let answer = dispatcher.dispatch(notice("Q", "-Information for user carol (using account carolQ):"));
        assert!(matches!(answer, DispatchOutcome::Tracked));
        first.finished().await;
        second.finished().await;

        assert_eq!(
            texts(&mut rx),
            vec![pair("#chan", "carol: carolQ"), pair("#chan", "carol: carolQ")]
        );
    }

    #[tokio::test]
    async fn test_admin_command_checks_account() {
        let mut config = BotConfig::default();
        config.admins = vec!["luc".to_string()];
        let (dispatcher, mut rx) = dispatcher(config, &AuthorityConfig::default());

        dispatcher.dispatch(say("mallory", "#chan", "!secret open")).finished().await;
        dispatcher.dispatch(say("luc", "#chan", "!secret open")).finished().await;

        assert_eq!(
            texts(&mut rx),
            vec![
                pair("#chan", "Sorry, you can't do that by yourself, ask luc"),
                pair("#chan", "open"),
            ]
        );
    }

    #[tokio::test]
    async fn test_admin_with_authority_ignores_display_name() {
        let mut config = BotConfig::default();
        config.admins = vec!["luc".to_string()];
        let (dispatcher, mut rx) = dispatcher(config, &authority());

        let outcome = dispatcher.dispatch(say("luc", "#chan", "!secret open"));
        tokio::task::yield_now().await;
        dispatcher.dispatch(notice("Q", "User luc is not authed."));
        outcome.finished().await;

        let sent = texts(&mut rx);
        assert_eq!(sent.last(), Some(&pair("#chan", "Sorry, you can't do that by yourself, ask luc")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_denial_skips_handler() {
        let mut config = BotConfig::default();
        config.answer_rate_denied = true;
        let (dispatcher, mut rx) = dispatcher(config, &AuthorityConfig::default());

        for text in ["!echo one", "!echo two"] {
            dispatcher.dispatch(say("eve", "#chan", text)).finished().await;
        }
        let denied = dispatcher.dispatch(say("eve", "#chan", "!echo three"));
        assert!(matches!(denied, DispatchOutcome::RateDenied));

        tokio::time::advance(Duration::from_secs(5)).await;
        dispatcher.dispatch(say("eve", "#chan", "!echo four")).finished().await;

        let sent = drain(&mut rx);
        let lines: Vec<(&str, Delivery)> = sent.iter().map(|m| (m.text.as_str(), m.delivery)).collect();
        assert_eq!(
            lines,
            vec![
                ("one", Delivery::Message),
                ("two", Delivery::Message),
                ("Nop.", Delivery::Notice),
                ("four", Delivery::Message),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_rate_denial_sends_nothing() {
        let mut config = BotConfig::default();
        config.answer_rate_denied = false;
        let (dispatcher, mut rx) = dispatcher(config, &AuthorityConfig::default());

        for text in ["!echo one", "!echo two"] {
            dispatcher.dispatch(say("eve", "#chan", text)).finished().await;
        }
        assert_eq!(texts(&mut rx), vec![pair("#chan", "one"), pair("#chan", "two")]);

        let denied = dispatcher.dispatch(say("eve", "#chan", "!echo three"));
        assert!(matches!(denied, DispatchOutcome::RateDenied));
        assert!(texts(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_trigger_subject_waits_for_authority() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &authority());

        let outcome = dispatcher.dispatch(say("alice", "#chan", "vouch for carol"));
        assert!(matches!(outcome, DispatchOutcome::Triggers(_)));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(texts(&mut rx), vec![pair("Q@CServe.quakenet.org", "WHOIS carol")]);

        dispatcher.dispatch(notice("Q", "-Information for user carol (using account carolQ):"));
        outcome.finished().await;
        assert_eq!(texts(&mut rx), vec![pair("#chan", "carol is carolQ")]);
    }

    #[tokio::test]
    async fn test_trigger_on_notice_answers_with_notice() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &AuthorityConfig::default());

        dispatcher.dispatch(notice("alice", "hello there")).finished().await;
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "alice");
        assert_eq!(sent[0].delivery, Delivery::Notice);
    }

    #[tokio::test]
    async fn test_new_session_forgets_identities() {
        let mut config = BotConfig::default();
        config.admins = vec!["lucQ".to_string()];
        let (dispatcher, mut rx) = dispatcher(config, &authority());
        let q = "Q@CServe.quakenet.org";

        let first = dispatcher.dispatch(say("luc", "#chan", "!secret open"));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        dispatcher.dispatch(notice("Q", "-Information for user luc (using account lucQ):"));
        first.finished().await;
        assert_eq!(texts(&mut rx), vec![pair(q, "WHOIS luc"), pair("#chan", "open")]);

        let welcome = LineEvent::new(EventKind::Welcome, Source::nick("irc.example.net"), "notabot", Vec::new());
        assert!(matches!(dispatcher.dispatch(welcome), DispatchOutcome::Tracked));

        // Whoever holds the name now is asked about again
        let second = dispatcher.dispatch(say("luc", "#chan", "!secret again"));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        dispatcher.dispatch(notice("Q", "User luc is not authed."));
        second.finished().await;
        assert_eq!(
            texts(&mut rx),
            vec![
                pair(q, "WHOIS luc"),
                pair("#chan", "Sorry, you can't do that by yourself, ask lucQ"),
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_options_reply_with_help() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &AuthorityConfig::default());

        let outcome = dispatcher.dispatch(say("alice", "#chan", "!echo"));
        assert!(matches!(outcome, DispatchOutcome::Rejected));
        assert_eq!(
            texts(&mut rx),
            vec![pair("#chan", "Bad command line - nothing to echo"), pair("#chan", "echo <text>")]
        );
    }

    #[tokio::test]
    async fn test_handler_faults_do_not_stop_dispatch() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &AuthorityConfig::default());

        dispatcher.dispatch(say("alice", "#chan", "!fail")).finished().await;
        dispatcher.dispatch(say("bob", "#chan", "!fail panic")).finished().await;
        dispatcher.dispatch(say("carol", "#chan", "!echo still here")).finished().await;

        assert_eq!(
            texts(&mut rx),
            vec![
                pair("#chan", INTERNAL_FAILURE),
                pair("#chan", INTERNAL_FAILURE),
                pair("#chan", "still here"),
            ]
        );
    }

    #[tokio::test]
    async fn test_reply_targets() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &AuthorityConfig::default());

        dispatcher.dispatch(say("alice", "notabot", "!echo private")).finished().await;
        dispatcher.dispatch(say("bob", "#chan", "!whisper psst")).finished().await;

        let sent = drain(&mut rx);
        assert_eq!(sent[0].target, "alice");
        assert_eq!(sent[0].delivery, Delivery::Message);
        assert_eq!(sent[1].target, "bob");
        assert_eq!(sent[1].delivery, Delivery::Notice);
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &AuthorityConfig::default());
        let outcome = dispatcher.dispatch(say("alice", "#chan", "!nope hello"));
        assert!(matches!(outcome, DispatchOutcome::Ignored));
        assert!(texts(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_triggers_skip_prefixed_lines() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &AuthorityConfig::default());

        dispatcher.dispatch(say("alice", "#chan", "well hello there")).finished().await;
        let prefixed = dispatcher.dispatch(say("alice", "#chan", "!hello"));
        assert!(matches!(prefixed, DispatchOutcome::Ignored));

        assert_eq!(texts(&mut rx), vec![pair("#chan", "Hello alice!")]);
    }

    #[tokio::test]
    async fn test_notices_never_run_commands() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &authority());
        let outcome = dispatcher.dispatch(notice("alice", "!echo sneaky"));
        assert!(matches!(outcome, DispatchOutcome::Ignored));
        assert!(texts(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_participant_events_reach_resolver() {
        let (dispatcher, mut rx) = dispatcher(BotConfig::default(), &authority());
        let resolver = dispatcher.bot.identity.clone();

        let names = LineEvent::new(
            EventKind::NamesReply,
            Source::nick("irc.example.net"),
            "notabot",
            vec!["=".to_string(), "#chan".to_string(), "@op frank".to_string()],
        );
        dispatcher.dispatch(names);
        assert_eq!(resolver.state("frank"), Some(QueryState::Unchecked));

        dispatcher.dispatch(LineEvent::new(EventKind::Join, Source::nick("gina"), "#chan", Vec::new()));
        assert_eq!(texts(&mut rx), vec![pair("Q@CServe.quakenet.org", "WHOIS gina")]);

        dispatcher.dispatch(LineEvent::new(EventKind::NickChange, Source::nick("gina"), "gina_", Vec::new()));
        assert_eq!(resolver.state("gina_"), Some(QueryState::Checking));

        dispatcher.dispatch(LineEvent::new(EventKind::Quit, Source::nick("gina_"), "", Vec::new()));
        assert_eq!(resolver.state("gina_"), None);

        let part = dispatcher.dispatch(LineEvent::new(EventKind::Part, Source::nick("frank"), "#chan", Vec::new()));
        assert!(matches!(part, DispatchOutcome::Tracked));
        assert_eq!(resolver.state("frank"), None);
    }

    #[test]
    fn test_error_replies() {
        assert_eq!(error_reply("help", &CommandError::bad_options("")), "help");
        assert_eq!(error_reply("", &CommandError::bad_options("x")), "Bad command line - x");
        assert_eq!(error_reply("h", &CommandError::Unsafe("No way.".into())), "No way.");
        assert_eq!(error_reply("h", &CommandError::NotImplemented), "Not implemented. Sorry !");
        assert_eq!(error_reply("h", &CommandError::Timeout), "Timed out, try again later.");
    }
}
