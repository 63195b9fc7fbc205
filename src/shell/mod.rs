//! Command shell for the process: capabilities register named commands,
//! and the first command-line word picks one to run.
//!
//! Three commands are always present: `help`, `launch <capability> [args..]`
//! and `test <capability> [args..]`.

mod chat;

pub use chat::ChatCapability;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ShellError;
use crate::Result;

pub type CommandFuture = BoxFuture<'static, Result<()>>;
pub type CommandHandler = Arc<dyn Fn(Vec<String>) -> CommandFuture + Send + Sync>;

const BUILTINS: [&str; 3] = ["help", "launch", "test"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

impl Arity {
    fn accepts(&self, passed: usize) -> bool {
        match self {
            Arity::Fixed(n) => *n == passed,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{} args", n),
            Arity::Variadic => f.write_str("any args"),
        }
    }
}

#[derive(Clone)]
pub struct Command {
    pub name: &'static str,
    pub arity: Arity,
    pub description: &'static str,
    pub handler: CommandHandler,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// A pluggable unit of functionality the shell can launch and test.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;

    async fn launch(&self, args: Vec<String>) -> Result<()>;

    /// Self-check; `Ok(false)` means the capability is not usable.
    async fn test(&self, _args: Vec<String>) -> Result<bool> {
        Ok(true)
    }

    /// Extra commands this capability adds to the shell.
    fn commands(self: Arc<Self>) -> Vec<Command> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Help(Vec<String>),
    Tested(bool),
    Done,
}

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<&'static str, Arc<dyn Capability>>,
    commands: BTreeMap<&'static str, Command>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        for command in capability.clone().commands() {
            if BUILTINS.contains(&command.name) || self.commands.contains_key(command.name) {
                warn!(
                    "Capability {} tried to redefine command {}",
                    capability.name(),
                    command.name
                );
                continue;
            }
            self.commands.insert(command.name, command);
        }
        info!("Registered capability {}", capability.name());
        self.capabilities.insert(capability.name(), capability);
    }

    pub fn capability(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.capabilities.get(name)
    }

    pub fn help(&self) -> Vec<String> {
        let mut lines = vec![
            "help (0 args): Lists the available commands.".to_string(),
            "launch (any args): Launches the named capability.".to_string(),
            "test (any args): Runs the named capability's self-check.".to_string(),
        ];
        lines.extend(
            self.commands
                .values()
                .map(|c| format!("{} ({}): {}", c.name, c.arity, c.description)),
        );
        lines
    }

    /// Runs `argv[0]` with the remaining words as its arguments.
    pub async fn dispatch(&self, argv: &[String]) -> Result<Dispatched> {
        let Some((name, args)) = argv.split_first() else {
            return Ok(Dispatched::Help(self.help()));
        };
        let args = args.to_vec();

        match name.as_str() {
            "help" => Ok(Dispatched::Help(self.help())),
            "launch" => {
                let (capability, rest) = self.resolve(&args)?;
                capability.launch(rest).await?;
                Ok(Dispatched::Done)
            }
            "test" => {
                let (capability, rest) = self.resolve(&args)?;
                let passed = capability.test(rest).await?;
                info!(
                    "Capability {} {}",
                    capability.name(),
                    if passed { "passed" } else { "failed" }
                );
                Ok(Dispatched::Tested(passed))
            }
            other => {
                let command = self
                    .commands
                    .get(other)
                    .ok_or_else(|| ShellError::UnknownCommand(other.to_string()))?;
                if !command.arity.accepts(args.len()) {
                    let expected = match command.arity {
                        Arity::Fixed(n) => n,
                        Arity::Variadic => 0,
                    };
                    return Err(ShellError::Arity {
                        command: other.to_string(),
                        expected,
                        passed: args.len(),
                    }
                    .into());
                }
                (command.handler)(args).await?;
                Ok(Dispatched::Done)
            }
        }
    }

    fn resolve(&self, args: &[String]) -> Result<(Arc<dyn Capability>, Vec<String>)> {
        let (name, rest) = args
            .split_first()
            .ok_or(ShellError::MissingArgument("capability"))?;
        let capability = self
            .capabilities
            .get(name.as_str())
            .ok_or_else(|| ShellError::UnknownCapability(name.clone()))?;
        Ok((capability.clone(), rest.to_vec()))
    }
}
