use crate::ipc::error::err;
use crate::ipc::types::{Actor, Request, Role};

/// Directory reads accept any caller the identity provider vouched for.
pub fn any_actor(req: &Request) -> Result<&Actor, serde_json::Value> {
    match req.actor.as_ref() {
        Some(a) => Ok(a),
        None => Err(err(
            &req.id,
            "unauthorized",
            "request carries no actor",
            None,
        )),
    }
}

/// Mutations are gated to the administrative role.
pub fn admin_actor(req: &Request) -> Result<&Actor, serde_json::Value> {
    let actor = any_actor(req)?;
    if actor.role != Role::Admin {
        return Err(err(
            &req.id,
            "forbidden",
            "administrative role required",
            None,
        ));
    }
    Ok(actor)
}
