use pilot_lib::network::message::*;
use pilot_lib::network::protocol::*;
use pilot_lib::settings::Shared;
use pilot_lib::{State, Subtask, Task, TaskInput};

use crate::internal_prelude::*;

/// Send a request to the daemon and return its response.
pub async fn send_request<T>(shared: &Shared, message: T) -> Result<Response>
where
    T: Into<Request>,
    T: serde::Serialize + std::fmt::Debug,
{
    let mut stream = get_client_stream(shared)
        .await
        .context("Failed to connect to the daemon")?;

    send_message::<_, Request>(message, &mut stream)
        .await
        .context("Failed to send request")?;
    let response = receive_response(&mut stream)
        .await
        .context("Failed to receive response")?;

    Ok(response)
}

pub fn assert_success(response: Response) {
    assert!(
        matches!(response, Response::Success(_)),
        "Expected a success, got {response:?}"
    );
}

pub fn assert_failure(response: Response) {
    assert!(
        matches!(response, Response::Failure(_)),
        "Expected a failure, got {response:?}"
    );
}

/// Add a task and return its id.
pub async fn add_task(shared: &Shared, kind: &str, input: TaskInput) -> Result<String> {
    let message = AddMessage {
        kind: kind.to_string(),
        input,
        subtasks: Vec::new(),
    };

    match send_request(shared, message).await? {
        Response::AddedTask(task_id) => Ok(task_id),
        response => bail!("Failed to add task: {response:?}"),
    }
}

/// Add a chained task and return its id.
pub async fn add_chain(shared: &Shared, subtasks: Vec<Subtask>) -> Result<String> {
    let message = AddMessage {
        kind: pilot_lib::CHAINED_KIND.to_string(),
        input: TaskInput::default(),
        subtasks,
    };

    match send_request(shared, message).await? {
        Response::AddedTask(task_id) => Ok(task_id),
        response => bail!("Failed to add chain: {response:?}"),
    }
}

pub async fn get_state(shared: &Shared) -> Result<State> {
    match send_request(shared, Request::List).await? {
        Response::Status(state) => Ok(*state),
        response => bail!("Didn't get the state: {response:?}"),
    }
}

pub async fn get_task(shared: &Shared, task_id: &str) -> Result<Task> {
    match send_request(shared, Request::Get(task_id.to_string())).await? {
        Response::Task(task) => Ok(*task),
        response => bail!("Didn't get task {task_id}: {response:?}"),
    }
}

/// Send a request that targets a finished task.
///
/// Right after a task finished, its runner might still be winding down and the daemon refuses
/// such requests for a short moment. They're simply sent again in that case.
pub async fn send_after_wind_down(shared: &Shared, request: Request) -> Result<Response> {
    let sleep = 20;
    for _ in 0..(super::TIMEOUT / sleep) {
        match send_request(shared, request.clone()).await? {
            Response::Failure(text) if text.contains("wound down") => {
                super::sleep_ms(sleep).await;
            }
            response => return Ok(response),
        }
    }

    bail!("The daemon kept refusing {request:?}")
}
