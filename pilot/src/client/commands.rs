//! The handling of all subcommands.
//!
//! Every command results in exactly one request to the daemon, but some of them need to
//! prepare their request by reading local files.
use std::fs::read_to_string;
use std::path::Path;

use pilot_lib::network::message::{AddMessage, Request, Response};
use pilot_lib::{RouteTable, Subtask, TaskInput, CHAINED_KIND};

use super::cli::SubCommand;
use super::client::Client;
use super::display::*;
use crate::internal_prelude::*;

/// Run a single subcommand against the daemon.
pub async fn handle_command(client: &mut Client, subcommand: SubCommand) -> Result<()> {
    match subcommand {
        SubCommand::Add {
            kind,
            url,
            label,
            params,
            subtasks,
            print_task_id,
        } => {
            let input = TaskInput {
                target_url: url,
                label,
                params: params.into_iter().collect(),
                ..Default::default()
            };
            let message = match subtasks {
                Some(path) => AddMessage {
                    kind: CHAINED_KIND.to_string(),
                    input,
                    subtasks: read_subtasks(&path)?,
                },
                None => AddMessage {
                    kind: kind.unwrap_or_default(),
                    input,
                    subtasks: Vec::new(),
                },
            };

            match client.request(message).await? {
                Response::AddedTask(task_id) if print_task_id => println!("{task_id}"),
                Response::AddedTask(task_id) => println!("New task added (id {task_id})."),
                response => handle_response(response),
            }
        }
        SubCommand::Status { json } => match client.request(Request::List).await? {
            Response::Status(mut state) if json => {
                for task in state.tasks.values_mut() {
                    task.logs.clear();
                }
                println!("{}", serde_json::to_string(&state)?);
            }
            Response::Status(state) => print_state(&state),
            response => handle_response(response),
        },
        SubCommand::Get { task_id, json } => match client.request(Request::Get(task_id)).await? {
            Response::Task(task) if json => println!("{}", serde_json::to_string(&task)?),
            Response::Task(task) => print_task(&task),
            response => handle_response(response),
        },
        SubCommand::Restart { task_id } => simple(client, Request::Restart(task_id)).await?,
        SubCommand::Resume { task_id } => simple(client, Request::Resume(task_id)).await?,
        SubCommand::Stop { task_id } => simple(client, Request::Stop(task_id)).await?,
        SubCommand::KillAll => simple(client, Request::KillAll).await?,
        SubCommand::Remove { task_id } => simple(client, Request::Delete(task_id)).await?,
        SubCommand::Routes { update, json } => {
            let request = match update {
                Some(path) => Request::UpdateRoutes(read_routes(&path)?),
                None => Request::GetRoutes,
            };
            match client.request(request).await? {
                Response::Routes(routes) if json => println!("{}", serde_json::to_string(&routes)?),
                Response::Routes(routes) => print_routes(&routes),
                response => handle_response(response),
            }
        }
        SubCommand::Pool { json } => match client.request(Request::PoolStatus).await? {
            Response::Pool(status) if json => println!("{}", serde_json::to_string(&status)?),
            Response::Pool(status) => print_pool(&status),
            response => handle_response(response),
        },
        SubCommand::Shutdown => simple(client, Request::Shutdown).await?,
    }

    Ok(())
}

/// Send a request, whose response is either a success or a failure message.
async fn simple(client: &mut Client, request: Request) -> Result<()> {
    let response = client.request(request).await?;
    handle_response(response);

    Ok(())
}

/// Print a generic success or failure message.
/// The client exits with a non-zero code, if the daemon refused the request.
fn handle_response(response: Response) {
    match response {
        Response::Success(text) => print_success(&text),
        Response::Failure(text) => {
            print_error(&text);
            std::process::exit(1);
        }
        Response::Close => {}
        _ => error!("Received unhandled response message"),
    }
}

fn read_subtasks(path: &Path) -> Result<Vec<Subtask>> {
    let content =
        read_to_string(path).wrap_err_with(|| format!("Failed to read subtasks from {path:?}"))?;
    let subtasks: Vec<Subtask> = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse subtasks in {path:?}"))?;
    if subtasks.is_empty() {
        bail!("A chained task needs at least one subtask");
    }

    Ok(subtasks)
}

fn read_routes(path: &Path) -> Result<RouteTable> {
    let content =
        read_to_string(path).wrap_err_with(|| format!("Failed to read routes from {path:?}"))?;
    serde_yaml::from_str(&content).wrap_err_with(|| format!("Failed to parse routes in {path:?}"))
}
