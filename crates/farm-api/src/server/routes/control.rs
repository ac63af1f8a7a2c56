#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    config: Option<SessionConfig>,
    #[serde(default)]
    sqlite_path: Option<String>,
    #[serde(default)]
    replace_existing: bool,
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, HttpApiError> {
    let config = request.config.unwrap_or_default();
    let mut api = SessionApi::from_config(config.clone());

    if let Some(path) = request.sqlite_path.as_deref() {
        api.attach_sqlite_store(path)
            .map_err(HttpApiError::from_persistence)?;
        match api.load_persisted_state() {
            Ok(loaded) => {
                if loaded {
                    tracing::info!(
                        session_id = %config.session_id,
                        "restored session from persisted snapshot"
                    );
                }
            }
            Err(err) => return Err(HttpApiError::from_persistence(err)),
        }
    }

    let mut inner = state.inner.lock().await;
    if let Some(active) = inner.api.as_ref() {
        if !request.replace_existing {
            return Err(HttpApiError::session_conflict(active.session_id()));
        }
    }
    let status = api.status();
    inner.api = Some(api);
    if !inner.driver_started {
        inner.driver_started = true;
        spawn_session_driver(
            state.clone(),
            config.drain_interval_ms,
            config.tick_interval_ms,
        );
    }

    Ok((StatusCode::CREATED, Json(status)))
}

#[derive(Debug, Deserialize)]
struct JoinSessionRequest {
    user_id: String,
}

async fn join_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<JoinSessionRequest>,
) -> Result<impl IntoResponse, HttpApiError> {
    if request.user_id.trim().is_empty() {
        return Err(HttpApiError::invalid_action("user_id must not be empty", None));
    }

    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner, &session_id)?;
    let snapshot = api.join(&request.user_id, now_ms());
    Ok(Json(snapshot))
}

async fn submit_action(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(envelope): Json<ActionEnvelope>,
) -> Result<impl IntoResponse, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner, &session_id)?;

    let queue_depth = api.submit_action(envelope).map_err(|err| HttpApiError {
        status: StatusCode::BAD_REQUEST,
        error: err,
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "queued": true, "queue_depth": queue_depth })),
    ))
}
