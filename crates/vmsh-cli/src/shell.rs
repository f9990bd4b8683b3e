use crate::command::{Command, HELP, PoolCommand};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::future::Future;
use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use vmsh_control::{LifecycleController, StateChange, StateSink};
use vmsh_core::{Pool, VmRequest};

pub const PROMPT: &str = "vms> ";

/// Prints state changes between prompts.
pub struct ConsoleSink;

impl StateSink for ConsoleSink {
    fn on_state_change(&self, change: &StateChange) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\n{change}\n{PROMPT}");
        let _ = out.flush();
    }
}

/// What the loop does after a command ran.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Print(String),
    Silent,
    Exit,
}

pub struct Shell {
    controller: LifecycleController,
    remembered: Option<String>,
    /// Set once this session selected, created or deleted a pool.
    selection_changed: bool,
}

impl Shell {
    #[must_use]
    pub fn new(controller: LifecycleController) -> Self {
        Self {
            controller,
            remembered: None,
            selection_changed: false,
        }
    }

    /// Log in, load the pool index and reselect the remembered pool.
    ///
    /// Failures are reported and the shell starts anyway.
    pub async fn start(&mut self, remembered: Option<&str>) {
        self.remembered = remembered.map(str::to_string);
        if let Err(e) = self.controller.login().await {
            warn!("Login failed: {e}");
            println!("Login failed: {e}");
        }
        if let Err(e) = self.controller.list().await {
            warn!("Could not list pools: {e}");
            println!("Could not list pools: {e}");
            return;
        }
        if let Some(name) = remembered {
            match self.controller.select(name).await {
                Ok(true) => {
                    self.selection_changed = true;
                    println!("Selected pool {name}");
                }
                Ok(false) => {
                    self.selection_changed = true;
                    println!("Pool {name} is gone, create or select another one");
                }
                Err(e) => println!("Could not select pool {name}: {e}"),
            }
        }
    }

    /// Read commands until `exit`, end of input or Ctrl-C.
    ///
    /// # Errors
    /// Returns an error if standard input cannot be read.
    pub async fn run(&mut self) -> Result<()> {
        self.serve(spawn_line_reader(), tokio::signal::ctrl_c()).await
    }

    /// Command loop over `lines`; `interrupt` ends it, also while a command runs.
    async fn serve<F: Future>(
        &mut self,
        mut lines: mpsc::Receiver<std::io::Result<String>>,
        interrupt: F,
    ) -> Result<()> {
        tokio::pin!(interrupt);

        loop {
            prompt();
            let line = tokio::select! {
                line = lines.recv() => line,
                _ = &mut interrupt => {
                    debug!("Interrupted");
                    println!();
                    break;
                }
            };
            let Some(line) = line.transpose()? else {
                println!();
                break;
            };

            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            };

            let outcome = tokio::select! {
                outcome = self.execute(command) => outcome,
                _ = &mut interrupt => {
                    debug!("Interrupted while a command was running");
                    println!();
                    break;
                }
            };
            match outcome {
                Ok(Outcome::Print(text)) => println!("{text}"),
                Ok(Outcome::Silent) => {}
                Ok(Outcome::Exit) => break,
                Err(e) => println!("Error: {e}"),
            }
        }
        Ok(())
    }

    /// Stop every poller and return the pool name to remember.
    ///
    /// The name given to [`Shell::start`] is kept unless this session changed
    /// the selection.
    pub async fn finish(&mut self) -> Option<String> {
        let current = self.controller.shutdown().await;
        if self.selection_changed {
            current
        } else {
            self.remembered.take()
        }
    }

    /// # Errors
    /// Returns an error if a remote call fails or local state is inconsistent.
    pub async fn execute(&mut self, command: Command) -> Result<Outcome> {
        let outcome = match command {
            Command::Empty => Outcome::Silent,
            Command::Version => Outcome::Print(format!("vmsh {}", env!("CARGO_PKG_VERSION"))),
            Command::Help => Outcome::Print(HELP.to_string()),
            Command::Exit => Outcome::Exit,
            Command::Add(args) => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                match VmRequest::parse(&args) {
                    Ok(request) => {
                        let names = self.controller.add_vms(&request).await?;
                        Outcome::Print(format!("Added {}", names.join(", ")))
                    }
                    Err(e) => Outcome::Print(e.messages().join("\n")),
                }
            }
            Command::Remove(name) => {
                if self.controller.remove_vm(&name).await {
                    Outcome::Print(format!("Removed {name}"))
                } else {
                    Outcome::Print(format!("VM {name} not found"))
                }
            }
            Command::Show { json } => {
                let pool = self.controller.snapshot().await;
                if json {
                    Outcome::Print(serde_json::to_string_pretty(&pool)?)
                } else {
                    Outcome::Print(render_pool(&pool))
                }
            }
            Command::Tasks(task_id) => {
                let status = self.controller.task_status(&task_id).await?;
                let (state, note) = status.current()?;
                Outcome::Print(format!("{state}: {}", note.as_deref().unwrap_or("-")))
            }
            Command::Pool(command) => self.execute_pool(command).await?,
        };
        Ok(outcome)
    }

    async fn execute_pool(&mut self, command: PoolCommand) -> Result<Outcome> {
        let text = match command {
            PoolCommand::Create(name) => {
                let pool = self.controller.create(name, None).await?;
                self.selection_changed = true;
                format!("Pool {} created", pool.display_name())
            }
            PoolCommand::Select(name) => {
                if self.controller.select(&name).await? {
                    self.selection_changed = true;
                    format!("Selected pool {name}")
                } else {
                    format!("Pool {name} not found, see 'pool list'")
                }
            }
            PoolCommand::List => {
                let selected = self.controller.snapshot().await.name;
                let index = self.controller.list().await?;
                render_index(index, selected.as_deref())
            }
            PoolCommand::Plan => transitioned(&self.controller.plan().await?),
            PoolCommand::Apply => transitioned(&self.controller.apply().await?),
            PoolCommand::Destroy => transitioned(&self.controller.destroy().await?),
            PoolCommand::Delete => {
                self.controller.delete().await?;
                self.selection_changed = true;
                "Pool deleted".to_string()
            }
        };
        Ok(Outcome::Print(text))
    }
}

fn transitioned(pool: &Pool) -> String {
    format!("Pool {} is {}", pool.display_name(), pool.state)
}

fn prompt() {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{PROMPT}");
    let _ = out.flush();
}

fn spawn_line_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Pool header followed by a table of its VMs.
#[must_use]
pub fn render_pool(pool: &Pool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pool:  {}", pool.id.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "Name:  {}", pool.display_name());
    let _ = writeln!(out, "Owner: {}", pool.owner);
    match &pool.state_note {
        Some(note) => {
            let _ = writeln!(out, "State: {} ({note})", pool.state);
        }
        None => {
            let _ = writeln!(out, "State: {}", pool.state);
        }
    }

    if pool.items.is_empty() {
        out.push_str("No VMs");
        return out;
    }

    let _ = write!(
        out,
        "{:>3}  {:<12} {:<20} {:<18} {:>3} {:>4} {:>5}",
        "#", "id", "name", "os", "cpu", "ram", "disk"
    );
    for (i, vm) in pool.items.iter().enumerate() {
        let config = vm.config();
        let _ = write!(
            out,
            "\n{:>3}  {:<12} {:<20} {:<18} {:>3} {:>4} {:>5}",
            i + 1,
            vm.id.as_deref().unwrap_or("-"),
            vm.name,
            vm.os.as_str(),
            config.cpu,
            config.memory,
            config.disk
        );
    }
    out
}

/// Known pools, with the selected one marked.
#[must_use]
pub fn render_index(index: &BTreeMap<String, String>, selected: Option<&str>) -> String {
    if index.is_empty() {
        return "No pools".to_string();
    }
    index
        .iter()
        .map(|(name, id)| {
            let marker = if Some(name.as_str()) == selected {
                '*'
            } else {
                ' '
            };
            format!("{marker} {name:<24} {id}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
