//! Built-in administrative methods.

use serde_json::Value;

use crate::handler::{CallContext, FnHandler, HandlerResult, MethodRegistry, Outcome};

/// Names of the built-in methods.
pub const ADMIN_METHODS: [&str; 7] = [
    "exit",
    "getCommands",
    "getclient",
    "kill",
    "leave",
    "ping",
    "usage",
];

/// Install the built-in methods, skipping any name already registered.
///
/// Returns how many were added.
pub fn install_admin_methods(registry: &mut MethodRegistry) -> usize {
    let mut added = 0;

    added += install(registry, "ping", |_ctx, _p| Outcome::value("pong")) as usize;

    added += install(registry, "kill", |ctx, _p| {
        tracing::info!("kill requested by {}", ctx.source());
        ctx.server().exit();
        Outcome::value("killed")
    }) as usize;

    added += install(registry, "exit", |ctx, _p| {
        tracing::info!("exit requested by {}", ctx.source());
        ctx.server().exit();
        Outcome::value("okay")
    }) as usize;

    added += install(registry, "usage", |ctx, _p| Outcome::value(ctx.usage())) as usize;

    added += install(registry, "getCommands", |ctx, _p| {
        Outcome::value(ctx.method_names())
    }) as usize;

    added += install(registry, "getclient", |ctx, _p| {
        Outcome::value(ctx.method_names())
    }) as usize;

    // Reply goes out first; the socket closes when hang-ups are processed.
    added += install(registry, "leave", |ctx, _p| {
        ctx.server().hangup(ctx.source());
        Outcome::value("bye")
    }) as usize;

    added
}

fn install<F>(registry: &mut MethodRegistry, name: &str, handler: F) -> bool
where
    F: Fn(&CallContext<'_>, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
{
    let installed = registry.register_if_absent(name, FnHandler::new(handler));
    if !installed {
        tracing::debug!("Keeping user handler for built-in '{}'", name);
    }
    installed
}
