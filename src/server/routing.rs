//! Request Router: turns a request frame into a broker call and a response.

use bytes::Bytes;

use crate::broker::{BrokerCore, ClientId};
use crate::server::commands::PubSubCommand;
use crate::server::payload_cursor::PayloadCursor;
use crate::server::protocol::Response;

pub async fn route(opcode: u8, payload: Bytes, core: &BrokerCore, client_id: &ClientId) -> Response {
    let mut cursor = PayloadCursor::new(payload);

    match PubSubCommand::parse(opcode, &mut cursor) {
        Ok(cmd) => handle_pubsub(cmd, core, client_id).await,
        Err(e) => Response::Error(e.to_string()),
    }
}

async fn handle_pubsub(cmd: PubSubCommand, core: &BrokerCore, client_id: &ClientId) -> Response {
    let result = match cmd {
        PubSubCommand::Echo { payload } => return Response::Data(payload),
        PubSubCommand::Publish { topic, payload } => {
            core.on_publish(client_id, &topic, payload).await
        }
        PubSubCommand::Subscribe { pattern } => core.on_subscribe(client_id, &pattern).await,
        PubSubCommand::Unsubscribe { pattern } => core.on_unsubscribe(client_id, &pattern).await,
    };

    match result {
        Ok(()) => Response::Ok,
        Err(e) => Response::Error(e.to_string()),
    }
}
