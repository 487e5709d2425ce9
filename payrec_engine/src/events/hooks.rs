use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, TransitionAcceptedEvent};

/// The producer side of the hook system. The transition authority publishes every accepted transition to all
/// registered producers after the commit.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub transition_accepted_producers: Vec<EventProducer<TransitionAcceptedEvent>>,
}

pub struct EventHandlers {
    pub on_transition_accepted: Option<EventHandler<TransitionAcceptedEvent>>,
    pub on_notification: Option<EventHandler<TransitionAcceptedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_transition_accepted = hooks.on_transition_accepted.map(|f| EventHandler::new(buffer_size, f));
        let on_notification = hooks.on_notification.map(|f| EventHandler::new(buffer_size, f));
        Self { on_transition_accepted, on_notification }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_transition_accepted {
            result.transition_accepted_producers.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_notification {
            result.transition_accepted_producers.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_transition_accepted {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_notification {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

/// Hook registration. `on_transition_accepted` is where the side-effect dispatcher plugs in;
/// `on_notification` is the fire-and-forget user-messaging hook, which also receives every accepted transition.
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_transition_accepted: Option<Handler<TransitionAcceptedEvent>>,
    pub on_notification: Option<Handler<TransitionAcceptedEvent>>,
}

impl EventHooks {
    pub fn on_transition_accepted<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TransitionAcceptedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_transition_accepted = Some(Arc::new(f));
        self
    }

    pub fn on_notification<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TransitionAcceptedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_notification = Some(Arc::new(f));
        self
    }
}
