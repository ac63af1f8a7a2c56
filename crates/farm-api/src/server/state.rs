#[derive(Clone)]
struct AppState {
    inner: std::sync::Arc<Mutex<ServerInner>>,
    stream_tx: broadcast::Sender<StreamMessage>,
}

impl AppState {
    fn new() -> Self {
        let (stream_tx, _) = broadcast::channel(4096);
        Self {
            inner: std::sync::Arc::new(Mutex::new(ServerInner::default())),
            stream_tx,
        }
    }
}

#[derive(Default)]
struct ServerInner {
    api: Option<SessionApi>,
    driver_started: bool,
}

fn require_session<'a>(
    inner: &'a ServerInner,
    session_id: &str,
) -> Result<&'a SessionApi, HttpApiError> {
    let Some(api) = inner.api.as_ref() else {
        return Err(HttpApiError::session_not_found(session_id, None));
    };

    if api.session_id() != session_id {
        return Err(HttpApiError::session_not_found(
            session_id,
            Some(api.session_id()),
        ));
    }

    Ok(api)
}

fn require_session_mut<'a>(
    inner: &'a mut ServerInner,
    session_id: &str,
) -> Result<&'a mut SessionApi, HttpApiError> {
    let active_session_id = inner.api.as_ref().map(|api| api.session_id().to_string());
    let Some(api) = inner.api.as_mut() else {
        return Err(HttpApiError::session_not_found(session_id, None));
    };

    if api.session_id() != session_id {
        return Err(HttpApiError::session_not_found(
            session_id,
            active_session_id.as_deref(),
        ));
    }

    Ok(api)
}

fn broadcast_messages(state: &AppState, messages: Vec<StreamMessage>) {
    for message in messages {
        let _ = state.stream_tx.send(message);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Drive the session on its two cadences: the queue drain and the slower
/// gameplay tick. Spawned once, when the session is created.
fn spawn_session_driver(state: AppState, drain_interval_ms: u64, tick_interval_ms: u64) {
    tokio::spawn(async move {
        let mut drain_timer =
            tokio::time::interval(Duration::from_millis(drain_interval_ms.max(1)));
        let mut tick_timer = tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
        drain_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = drain_timer.tick() => {
                    let messages = {
                        let mut inner = state.inner.lock().await;
                        match inner.api.as_mut() {
                            Some(api) => {
                                let (_, events) = api.drain_once(now_ms()).await;
                                session_events_to_messages(api.session_id(), &events)
                            }
                            None => Vec::new(),
                        }
                    };
                    broadcast_messages(&state, messages);
                }
                _ = tick_timer.tick() => {
                    let messages = {
                        let mut inner = state.inner.lock().await;
                        match inner.api.as_mut() {
                            Some(api) => {
                                let events = api.run_tick(tick_interval_ms, now_ms());
                                session_events_to_messages(api.session_id(), &events)
                            }
                            None => Vec::new(),
                        }
                    };
                    broadcast_messages(&state, messages);
                }
            }
        }
    });
}
