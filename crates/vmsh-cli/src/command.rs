use anyhow::{Result, bail};
use std::str::FromStr;

pub const HELP: &str = "\
Commands:
  version                      show the shell version
  help                         show this help
  add <type> <os> [qty]        stage VMs in the selected pool
  rm <name>                    remove a staged VM
  show [json]                  show the selected pool
  pool create [name]           create a pool (name from the naming service if omitted)
  pool select <name>           select an existing pool
  pool list                    list pools
  pool plan                    submit the pool for planning
  pool apply                   submit the pool for provisioning
  pool destroy                 tear the pool's VMs down
  pool delete                  delete the pool
  tasks <task-id>              show a task's status
  exit | quit                  leave the shell";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolCommand {
    Create(Option<String>),
    Select(String),
    List,
    Plan,
    Apply,
    Destroy,
    Delete,
}

/// One line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Version,
    Help,
    Exit,
    Add(Vec<String>),
    Remove(String),
    Show { json: bool },
    Tasks(String),
    Pool(PoolCommand),
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, args)) = words.split_first() else {
            return Ok(Command::Empty);
        };

        let command = match (head, args) {
            ("version", []) => Command::Version,
            ("help", []) => Command::Help,
            ("exit" | "quit", []) => Command::Exit,
            ("add", args) => Command::Add(args.iter().map(ToString::to_string).collect()),
            ("rm", [name]) => Command::Remove((*name).to_string()),
            ("rm", _) => bail!("Usage: rm <name>"),
            ("show", []) => Command::Show { json: false },
            ("show", ["json"]) => Command::Show { json: true },
            ("show", _) => bail!("Usage: show [json]"),
            ("tasks", [task_id]) => Command::Tasks((*task_id).to_string()),
            ("tasks", _) => bail!("Usage: tasks <task-id>"),
            ("pool", args) => Command::Pool(parse_pool(args)?),
            (other, _) => bail!("Unknown command '{other}', type 'help' for the list"),
        };
        Ok(command)
    }
}

fn parse_pool(args: &[&str]) -> Result<PoolCommand> {
    let command = match args {
        ["create"] => PoolCommand::Create(None),
        ["create", name] => PoolCommand::Create(Some((*name).to_string())),
        ["select", name] => PoolCommand::Select((*name).to_string()),
        ["list"] => PoolCommand::List,
        ["plan"] => PoolCommand::Plan,
        ["apply"] => PoolCommand::Apply,
        ["destroy"] => PoolCommand::Destroy,
        ["delete"] => PoolCommand::Delete,
        ["select"] => bail!("Usage: pool select <name>"),
        _ => bail!("Usage: pool create [name] | select <name> | list | plan | apply | destroy | delete"),
    };
    Ok(command)
}
