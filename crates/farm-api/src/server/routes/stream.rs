#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    client_id: Option<String>,
}

async fn stream_session(
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, HttpApiError> {
    let initial_message = {
        let inner = state.inner.lock().await;
        let status = require_session(&inner, &session_id)?.status();
        StreamMessage::session_status(&status)
    };

    Ok(ws.on_upgrade(move |socket| {
        stream_socket(socket, state, session_id, query.client_id, initial_message)
    }))
}

async fn stream_socket(
    mut socket: WebSocket,
    state: AppState,
    session_id: String,
    client_id: Option<String>,
    initial_message: StreamMessage,
) {
    if send_stream_message(&mut socket, &initial_message)
        .await
        .is_err()
    {
        return;
    }

    let mut rx = state.stream_tx.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        break;
                    }
                    _ => {}
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Ok(message) => {
                        if message.session_id != session_id
                            || !message.should_deliver(client_id.as_deref())
                        {
                            continue;
                        }

                        if send_stream_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let warning = StreamMessage::warning(
                            &session_id,
                            format!("stream client lagged and skipped {skipped} message(s)"),
                        );

                        if send_stream_message(&mut socket, &warning).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

async fn send_stream_message(
    socket: &mut WebSocket,
    message: &StreamMessage,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}

#[derive(Debug, Clone, Serialize)]
struct StreamMessage {
    schema_version: String,
    #[serde(rename = "type")]
    message_type: String,
    session_id: String,
    /// `None` broadcasts to every session member; `Some` unicasts to the
    /// originating client only.
    client_id: Option<String>,
    payload: Value,
}

impl StreamMessage {
    fn session_status(status: &SessionStatus) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: "session.status".to_string(),
            session_id: status.session_id.clone(),
            client_id: None,
            payload: serde_json::to_value(status).unwrap_or(Value::Null),
        }
    }

    fn warning(session_id: &str, message: String) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: "warning".to_string(),
            session_id: session_id.to_string(),
            client_id: None,
            payload: json!({ "message": message }),
        }
    }

    /// Unicast messages are delivered only to their addressee; everything
    /// else fans out to every subscriber of the session.
    fn should_deliver(&self, subscriber_client_id: Option<&str>) -> bool {
        match self.client_id.as_deref() {
            None => true,
            Some(addressee) => subscriber_client_id == Some(addressee),
        }
    }
}

fn session_events_to_messages(session_id: &str, events: &[SessionEvent]) -> Vec<StreamMessage> {
    events
        .iter()
        .map(|event| {
            let (message_type, client_id) = match event {
                SessionEvent::Event(_) => ("event", None),
                SessionEvent::ActionError(notice) => {
                    ("action_error", Some(notice.client_id.clone()))
                }
                SessionEvent::Tick(_) => ("tick", None),
            };
            StreamMessage {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                message_type: message_type.to_string(),
                session_id: session_id.to_string(),
                client_id,
                payload: serde_json::to_value(event).unwrap_or(Value::Null),
            }
        })
        .collect()
}
