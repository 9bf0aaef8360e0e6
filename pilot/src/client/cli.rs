use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueHint};

#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    /// Create a new task and hand it to the daemon.
    ///
    /// Chained tasks are created by passing a JSON file with a list of subtasks, e.g.
    ///
    /// [{"type": "snapshot", "input": {"target_url": "https://example.org"}}]
    Add {
        /// The type of the task. This selects the automation that's run for it.
        #[arg(required_unless_present = "subtasks")]
        kind: Option<String>,

        /// The page the automation should start on.
        #[arg(short, long, value_hint = ValueHint::Url)]
        url: Option<String>,

        /// A human readable name for this task.
        #[arg(short, long)]
        label: Option<String>,

        /// Automation specific parameters in the form of `key=value`.
        /// Can be passed multiple times.
        #[arg(short = 'P', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// A JSON file containing the subtasks of a chained task.
        #[arg(short, long, value_hint = ValueHint::FilePath, conflicts_with = "kind")]
        subtasks: Option<PathBuf>,

        /// Only print the id of the new task.
        #[arg(short, long)]
        print_task_id: bool,
    },

    /// Display all known tasks.
    Status {
        /// Print the current state as json to stdout.
        /// This doesn't include the task logs.
        #[arg(short, long)]
        json: bool,
    },

    /// Display a single task, including its log and subtasks.
    Get {
        task_id: String,

        /// Print the task as json to stdout.
        #[arg(short, long)]
        json: bool,
    },

    /// Run a finished task again from the very start.
    Restart { task_id: String },

    /// Continue a failed or stopped chain at the subtask it stopped at.
    /// Subtasks that already completed aren't run again.
    Resume { task_id: String },

    /// Stop a task by closing its browser.
    Stop { task_id: String },

    /// Close every browser that's currently used by a task.
    KillAll,

    /// Remove a finished task and all of its screenshots.
    Remove { task_id: String },

    /// Show the routes of the proxy or replace them.
    Routes {
        /// A YAML file with the new route table.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        update: Option<PathBuf>,

        /// Print the route table as json to stdout.
        #[arg(short, long)]
        json: bool,
    },

    /// Show what the browser pool is currently doing.
    Pool {
        /// Print the pool status as json to stdout.
        #[arg(short, long)]
        json: bool,
    },

    /// Remotely shut down the daemon.
    /// Running tasks are stopped, pending tasks are picked up on the next start.
    Shutdown,
}

#[derive(Parser, Debug)]
#[command(
    name = "pilot",
    about = "Interact with the pilot daemon",
    author,
    version
)]
pub struct CliArguments {
    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// If provided, pilot only uses this config file.
    ///
    /// This path can also be set via the "PILOT_CONFIG_PATH" environment variable.
    /// The commandline option overwrites the environment variable!
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// The name of the profile that should be loaded from your config file.
    #[arg(short, long)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<SubCommand>,
}

/// Parse a single `key=value` parameter.
fn parse_param(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("'{input}' isn't in the form of key=value")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("depth=3", Some(("depth", "3")))]
    #[case("query=a=b", Some(("query", "a=b")))]
    #[case("empty=", Some(("empty", "")))]
    #[case("=value", None)]
    #[case("novalue", None)]
    fn params(#[case] input: &str, #[case] expected: Option<(&str, &str)>) {
        let expected = expected.map(|(key, value)| (key.to_string(), value.to_string()));
        assert_eq!(parse_param(input).ok(), expected);
    }

    #[test]
    fn chains_need_no_kind() {
        let arguments =
            CliArguments::try_parse_from(["pilot", "add", "--subtasks", "chain.json"]).unwrap();
        let Some(SubCommand::Add { kind, subtasks, .. }) = arguments.cmd else {
            panic!("Expected the add subcommand");
        };
        assert_eq!(kind, None);
        assert_eq!(subtasks, Some(PathBuf::from("chain.json")));
    }
}
