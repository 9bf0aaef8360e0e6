use pilot_lib::network::message::*;
use pilot_lib::{success_msg, RouteTable};

use crate::daemon::context::{read_routes, replace_routes, Context};
use crate::internal_prelude::*;

/// Invoked when calling `pilot routes`.
pub fn get_routes(ctx: &Context) -> Response {
    Response::Routes(read_routes(&ctx.routes))
}

/// Replace the proxy's route table. New connections use it right away.
pub fn update_routes(ctx: &Context, table: RouteTable) -> Response {
    info!(
        "Updating proxy routes: tunnel {}, {} domains",
        if table.enabled { "enabled" } else { "disabled" },
        table.domains.len()
    );
    replace_routes(&ctx.routes, table);

    success_msg!("Routes have been updated")
}
