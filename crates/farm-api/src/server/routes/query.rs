async fn get_status(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SessionStatus>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner, &session_id)?;
    Ok(Json(api.status()))
}

async fn get_snapshot(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner, &session_id)?;
    Ok(Json(api.world_state()))
}

#[derive(Debug, Deserialize)]
struct OutcomesQuery {
    #[serde(default)]
    since_version: u64,
}

/// Outcome tail for clients reconciling a detected version gap.
async fn get_outcomes(
    Path(session_id): Path<String>,
    Query(query): Query<OutcomesQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner, &session_id)?;
    let outcomes = api.outcomes_since(query.since_version);
    Ok(Json(json!({
        "session_id": session_id,
        "since_version": query.since_version,
        "outcomes": outcomes,
    })))
}
