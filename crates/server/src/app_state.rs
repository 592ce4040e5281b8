use server_api::ApiContext;
use shared::protocol::{ServerEvent, SessionResponse};
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    /// Fans an event out to connected presentation clients. Nobody listening is fine.
    pub(crate) fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) async fn publish_session(&self) {
        let session = self.api.sessions.session().await;
        self.publish(ServerEvent::SessionChanged {
            session: SessionResponse::from(&session),
        });
        let overlay = self.api.sessions.overlay().await;
        self.publish(ServerEvent::OverlayChanged { overlay });
    }
}
