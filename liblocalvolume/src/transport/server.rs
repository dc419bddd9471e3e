//! QUIC server that dispatches incoming requests to the driver roles.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// Largest request body accepted on a stream.
const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

/// Accepts QUIC connections and dispatches [`CsiMessage`] requests to a
/// [`CsiIdentity`] + [`CsiController`] + [`CsiNode`] implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "driver QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections until the endpoint is closed.
    ///
    /// Every connection and every bi-stream within it runs in its own task,
    /// so an operation keeps going even if the peer that issued it has gone.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "connection error");
                        }
                    }
                    Err(e) => warn!(error = %e, "incoming connection failed"),
                }
            });
        }
        Ok(())
    }

    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "stream handler error");
                }
            });
        }
    }

    /// One bi-stream: read request, dispatch, write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        let buf = recv
            .read_to_end(MAX_REQUEST_BYTES)
            .await
            .map_err(CsiError::transport)?;

        let response = match serde_json::from_slice::<CsiMessage>(&buf) {
            Ok(request) => {
                debug!(%request, "request received");
                dispatch(handler, request).await
            }
            Err(e) => CsiMessage::Error(CsiError::invalid(format!("malformed request: {e}"))),
        };
        if let CsiMessage::Error(e) = &response {
            debug!(code = %e.code(), error = %e, "request failed");
        }

        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// The underlying QUIC endpoint, for the bound address or shutdown.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

fn reply<V>(result: Result<V, CsiError>, ok: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    result.map_or_else(CsiMessage::Error, ok)
}

/// Map a request to the matching role call and wrap the result.
pub(crate) async fn dispatch<T>(handler: &T, request: CsiMessage) -> CsiMessage
where
    T: CsiIdentity + CsiController + CsiNode,
{
    match request {
        // --- Identity -------------------------------------------------------
        CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),
        CsiMessage::GetPluginInfo => {
            reply(handler.get_plugin_info().await, CsiMessage::PluginInfoResponse)
        }
        CsiMessage::GetPluginCapabilities => reply(
            handler.get_plugin_capabilities().await,
            CsiMessage::PluginCapabilitiesResponse,
        ),

        // --- Controller -----------------------------------------------------
        CsiMessage::CreateVolume(req) => {
            reply(handler.create_volume(req).await, CsiMessage::VolumeCreated)
        }
        CsiMessage::DeleteVolume(id) => reply(handler.delete_volume(&id).await, |()| CsiMessage::Ok),
        CsiMessage::ListVolumes => reply(handler.list_volumes().await, CsiMessage::VolumeList),
        CsiMessage::GetCapacity(req) => reply(handler.get_capacity(req).await, CsiMessage::Capacity),
        CsiMessage::ValidateVolumeCapabilities {
            volume_id,
            capabilities,
        } => reply(
            handler
                .validate_volume_capabilities(&volume_id, &capabilities)
                .await,
            CsiMessage::CapabilitiesValid,
        ),
        CsiMessage::GetControllerCapabilities => reply(
            CsiController::get_capabilities(handler).await,
            CsiMessage::ControllerCapabilitiesResponse,
        ),

        // --- Node -----------------------------------------------------------
        CsiMessage::StageVolume(req) => reply(handler.stage_volume(req).await, |()| CsiMessage::Ok),
        CsiMessage::UnstageVolume {
            volume_id,
            staging_target_path,
        } => reply(
            handler
                .unstage_volume(&volume_id, &staging_target_path)
                .await,
            |()| CsiMessage::Ok,
        ),
        CsiMessage::PublishVolume(req) => {
            reply(handler.publish_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::UnpublishVolume {
            volume_id,
            target_path,
        } => reply(
            handler.unpublish_volume(&volume_id, &target_path).await,
            |()| CsiMessage::Ok,
        ),
        CsiMessage::GetNodeInfo => reply(handler.get_info().await, CsiMessage::NodeInfoResponse),
        CsiMessage::GetNodeCapabilities => reply(
            CsiNode::get_capabilities(handler).await,
            CsiMessage::NodeCapabilitiesResponse,
        ),

        // Response variants never arrive as requests.
        other => {
            warn!(msg = %other, "unexpected message variant received as request");
            CsiMessage::Error(CsiError::invalid(format!("unexpected message: {other}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::backend::GIB;
    use crate::driver::tests::fake_driver;
    use crate::error::Code;
    use crate::handle::VolumeHandle;
    use crate::mount::fake::FakeMounter;
    use crate::types::*;

    #[tokio::test]
    async fn dispatch_routes_each_role() {
        let driver = fake_driver(Arc::new(FakeMounter::new()));

        assert!(matches!(
            dispatch(&driver, CsiMessage::Probe).await,
            CsiMessage::ProbeResult(true)
        ));
        assert!(matches!(
            dispatch(&driver, CsiMessage::GetCapacity(GetCapacityRequest::default())).await,
            CsiMessage::Capacity(c) if c == 100 * GIB
        ));
        assert!(matches!(
            dispatch(&driver, CsiMessage::GetNodeInfo).await,
            CsiMessage::NodeInfoResponse(info) if info.node_id == "node-A"
        ));

        let created = dispatch(
            &driver,
            CsiMessage::CreateVolume(CreateVolumeRequest {
                name: "pvc".into(),
                ..Default::default()
            }),
        )
        .await;
        let CsiMessage::VolumeCreated(vol) = created else {
            panic!("expected VolumeCreated");
        };
        assert_eq!(vol.capacity_bytes, GIB);

        assert!(matches!(
            dispatch(&driver, CsiMessage::DeleteVolume(vol.volume_id)).await,
            CsiMessage::Ok
        ));
    }

    #[tokio::test]
    async fn dispatch_carries_error_codes() {
        let driver = fake_driver(Arc::new(FakeMounter::new()));

        let resp = dispatch(
            &driver,
            CsiMessage::GetCapacity(GetCapacityRequest {
                parameters: HashMap::from([(BACKEND_PARAM_KEY.into(), "nope".into())]),
            }),
        )
        .await;
        let CsiMessage::Error(e) = resp else {
            panic!("expected error");
        };
        assert_eq!(e.code(), Code::InvalidArgument);

        let resp = dispatch(
            &driver,
            CsiMessage::DeleteVolume(VolumeHandle::from("no-separator")),
        )
        .await;
        assert!(matches!(resp, CsiMessage::Error(e) if e.code() == Code::NotFound));

        let resp = dispatch(
            &driver,
            CsiMessage::UnstageVolume {
                volume_id: "default/x".into(),
                staging_target_path: String::new(),
            },
        )
        .await;
        assert!(matches!(resp, CsiMessage::Error(e) if e.code() == Code::InvalidArgument));
    }

    #[tokio::test]
    async fn response_variant_as_request_is_rejected() {
        let driver = fake_driver(Arc::new(FakeMounter::new()));
        let resp = dispatch(&driver, CsiMessage::Capacity(1)).await;
        assert!(matches!(resp, CsiMessage::Error(CsiError::InvalidArgument(_))));
    }
}
