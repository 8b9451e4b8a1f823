use crate::{api::ApiContext, config::Settings, hub::Hub};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) hub: Hub,
}

impl AppState {
    pub(crate) fn new(settings: &Settings) -> Self {
        Self {
            api: ApiContext::new(settings.max_message_chars, settings.history_page_limit),
            hub: Hub::new(settings.broadcast_capacity),
        }
    }
}
