use pilot_lib::network::message::*;
use pilot_lib::network::protocol::send_response;
use pilot_lib::network::socket::GenericStream;
use pilot_lib::{failure_msg, success_msg};

use crate::daemon::context::Context;
use crate::internal_prelude::*;

/// Return a failure response from the handler, if the expression failed.
macro_rules! ok_or_failure {
    ($expression:expr, $action:expr) => {
        match super::or_failure($expression, $action) {
            Ok(inner) => inner,
            Err(response) => return response,
        }
    };
}

mod add;
mod remove;
mod restart;
mod routes;
mod stop;

pub async fn handle_request(
    stream: &mut GenericStream,
    request: Request,
    ctx: &Context,
) -> Result<()> {
    let response = match request {
        // The shutdown is an edge-case, as we have to respond to the client first.
        // Otherwise the daemon might be gone, before the client got its answer.
        Request::Shutdown => {
            let response = success_msg!("Daemon is shutting down");
            send_response(response, stream).await?;
            ctx.shutdown.notify_one();

            return Ok(());
        }
        Request::Add(message) => add::add_task(ctx, message),
        Request::List => list(ctx),
        Request::Get(task_id) => get(ctx, &task_id),
        Request::Delete(task_id) => remove::remove(ctx, &task_id),
        Request::Restart(task_id) => restart::restart(ctx, &task_id),
        Request::Resume(task_id) => restart::resume(ctx, &task_id),
        Request::Stop(task_id) => stop::stop(ctx, &task_id).await,
        Request::KillAll => stop::kill_all(ctx).await,
        Request::GetRoutes => routes::get_routes(ctx),
        Request::UpdateRoutes(table) => routes::update_routes(ctx, table),
        Request::PoolStatus => Response::Pool(ctx.pool.status()),
    };

    send_response(response, stream).await?;

    Ok(())
}

/// Invoked when calling `pilot status`.
fn list(ctx: &Context) -> Response {
    match ctx.store.list() {
        Ok(state) => Response::Status(Box::new(state)),
        Err(error) => failure_msg!("Failed to read tasks: {error:#}"),
    }
}

fn get(ctx: &Context, task_id: &str) -> Response {
    match ctx.store.get(task_id) {
        Ok(Some(task)) => Response::Task(Box::new(task)),
        Ok(None) => failure_msg!("Task {task_id} doesn't exist"),
        Err(error) => failure_msg!("Failed to read task {task_id}: {error:#}"),
    }
}

/// Turn an internal error into a failure response.
fn or_failure<T>(result: Result<T>, action: &str) -> Result<T, Response> {
    result.map_err(|error| {
        error!("Failed to {action}: {error:?}");
        failure_msg!("Failed to {action}: {error:#}")
    })
}
