//! The aggregated discovery stream handler.
//!
//! One task per stream reads discovery requests and drains the
//! connection's push channel; all sends for a connection go through the
//! single response channel, so pushes across resource types are
//! serialized without a lock. Stream errors close the stream and
//! deregister the connection; the proxy reconnects.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info};

use mesh_proto::discovery::aggregated_discovery_service_server::{
    AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
};
use mesh_proto::discovery::{DiscoveryRequest, DiscoveryResponse};

use crate::connection::{PushEvent, XdsConnection};
use crate::server::DiscoveryServer;

/// The gRPC-facing aggregated discovery service.
#[derive(Clone)]
pub struct AdsService {
    server: Arc<DiscoveryServer>,
}

impl AdsService {
    /// Wrap a discovery server.
    #[must_use]
    pub fn new(server: Arc<DiscoveryServer>) -> Self {
        Self { server }
    }

    /// Convert into a tonic service for `Server::add_service`.
    #[must_use]
    pub fn into_service(self) -> AggregatedDiscoveryServiceServer<Self> {
        AggregatedDiscoveryServiceServer::new(self)
    }
}

impl std::fmt::Debug for AdsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsService").finish_non_exhaustive()
    }
}

/// Response stream type for the aggregated discovery service.
pub type AdsResponseStream = ReceiverStream<Result<DiscoveryResponse, Status>>;

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = AdsResponseStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let peer_addr = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let stream = request.into_inner();

        let (tx, rx) = mpsc::channel(self.server.config().response_buffer_size);
        let server = Arc::clone(&self.server);
        tokio::spawn(async move {
            handle_stream(server, stream, tx, peer_addr).await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Drive one stream until it closes: requests from the proxy on one
/// side, push signals from the coordinator on the other.
async fn handle_stream(
    server: Arc<DiscoveryServer>,
    mut stream: Streaming<DiscoveryRequest>,
    tx: mpsc::Sender<Result<DiscoveryResponse, Status>>,
    peer_addr: String,
) {
    // Capacity one: a pending push absorbs any burst behind it.
    let (push_tx, mut push_rx) = mpsc::channel::<PushEvent>(1);
    let con = Arc::new(XdsConnection::new(peer_addr.clone(), push_tx));

    info!(peer = %peer_addr, "ADS stream opened");

    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(request)) => {
                        let responses = match server.handle_request(&con, request) {
                            Ok(responses) => responses,
                            Err(err) => {
                                error!(con = %con.con_id(), error = %err, "request handling failed");
                                let _ = tx.send(Err(err.into())).await;
                                break;
                            }
                        };
                        if !send_all(&tx, responses, &con).await {
                            break;
                        }
                    }
                    Some(Err(status)) => {
                        info!(con = %con.con_id(), peer = %peer_addr, status = %status, "stream terminated");
                        break;
                    }
                    None => {
                        info!(con = %con.con_id(), peer = %peer_addr, "stream closed by peer");
                        break;
                    }
                }
            }
            event = push_rx.recv() => {
                let Some(event) = event else { break };
                let responses = match server.push_connection(&con, &event) {
                    Ok(responses) => responses,
                    Err(err) => {
                        error!(con = %con.con_id(), error = %err, "push failed; closing stream");
                        let _ = tx.send(Err(err.into())).await;
                        break;
                    }
                };
                if !send_all(&tx, responses, &con).await {
                    break;
                }
            }
        }
    }

    server.remove_con(&con);
}

/// Send responses in order; false when the receiver is gone.
async fn send_all(
    tx: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    responses: Vec<DiscoveryResponse>,
    con: &Arc<XdsConnection>,
) -> bool {
    for response in responses {
        if tx.send(Ok(response)).await.is_err() {
            debug!(con = %con.con_id(), "client disconnected mid-send");
            return false;
        }
    }
    true
}
