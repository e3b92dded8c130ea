//! HTTP routes: the SSE endpoint plus the publisher and admin API.
//!
//! | Method | Path                              | Action                    |
//! |--------|-----------------------------------|---------------------------|
//! | GET    | `/events`                         | open an event stream      |
//! | POST   | `/broadcast`                      | broadcast the body        |
//! | POST   | `/groups/{group}/publish`         | publish the body to group |
//! | POST   | `/listeners/{id}/whisper`         | whisper the body          |
//! | PUT    | `/groups/{group}/listeners/{id}`  | join group                |
//! | DELETE | `/groups/{group}/listeners/{id}`  | leave group               |
//! | DELETE | `/listeners/{id}`                 | force disconnect          |
//! | GET    | `/listeners`, `/groups`           | list ids / group names    |
//! | GET    | `/groups/{group}`                 | group members             |
//! | GET    | `/history?limit=n`, `/history/{id}` | retained events         |
//! | GET    | `/stats`                          | broker counters           |

use std::convert::Infallible;

use bytes::Bytes;
use crier::{Broker, CrierError, EventId, ListenerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::config::ServerConfig;
use crate::stream;

/// Rejections raised by the API handlers.
#[derive(Debug)]
enum ApiRejection {
    InvalidBody,
    BrokerUnavailable,
    StreamingUnsupported,
    NotFound(&'static str),
    Internal,
}

impl warp::reject::Reject for ApiRejection {}

/// Map a broker error onto the rejection the client should see.
pub(crate) fn reject_broker_error(err: CrierError) -> Rejection {
    match err {
        CrierError::BrokerClosed => warp::reject::custom(ApiRejection::BrokerUnavailable),
        CrierError::StreamingUnsupported => {
            warp::reject::custom(ApiRejection::StreamingUnsupported)
        }
        other => {
            error!("Broker request failed: {}", other);
            warp::reject::custom(ApiRejection::Internal)
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GroupView {
    group: String,
    members: Vec<ListenerId>,
}

/// Build every route, with rejections recovered into responses.
pub fn routes(
    broker: Broker,
    config: &ServerConfig,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let body = text_body(config.max_body_bytes);
    let keep_alive = config.keep_alive_interval;

    let events = warp::path!("events")
        .and(warp::get())
        .and(with_broker(broker.clone()))
        .and_then(move |broker: Broker| stream::subscribe(broker, keep_alive));

    let broadcast = warp::path!("broadcast")
        .and(warp::post())
        .and(body.clone())
        .and(with_broker(broker.clone()))
        .and_then(broadcast);

    let publish = warp::path!("groups" / String / "publish")
        .and(warp::post())
        .and(body.clone())
        .and(with_broker(broker.clone()))
        .and_then(publish);

    let whisper = warp::path!("listeners" / ListenerId / "whisper")
        .and(warp::post())
        .and(body)
        .and(with_broker(broker.clone()))
        .and_then(whisper);

    let join = warp::path!("groups" / String / "listeners" / ListenerId)
        .and(warp::put())
        .and(with_broker(broker.clone()))
        .and_then(join_group);

    let leave = warp::path!("groups" / String / "listeners" / ListenerId)
        .and(warp::delete())
        .and(with_broker(broker.clone()))
        .and_then(leave_group);

    let disconnect = warp::path!("listeners" / ListenerId)
        .and(warp::delete())
        .and(with_broker(broker.clone()))
        .and_then(disconnect);

    let listeners = warp::path!("listeners")
        .and(warp::get())
        .and(with_broker(broker.clone()))
        .and_then(list_listeners);

    let groups = warp::path!("groups")
        .and(warp::get())
        .and(with_broker(broker.clone()))
        .and_then(list_groups);

    let group = warp::path!("groups" / String)
        .and(warp::get())
        .and(with_broker(broker.clone()))
        .and_then(group_members);

    let history = warp::path!("history")
        .and(warp::get())
        .and(warp::query::<HistoryQuery>())
        .and(with_broker(broker.clone()))
        .and_then(recent_history);

    let history_event = warp::path!("history" / u64)
        .and(warp::get())
        .and(with_broker(broker.clone()))
        .and_then(history_event);

    let stats = warp::path!("stats")
        .and(warp::get())
        .and(with_broker(broker))
        .and_then(stats);

    events
        .or(broadcast)
        .or(publish)
        .or(whisper)
        .or(join)
        .or(leave)
        .or(disconnect)
        .or(listeners)
        .or(groups)
        .or(group)
        .or(history)
        .or(history_event)
        .or(stats)
        .recover(handle_rejection)
}

fn with_broker(broker: Broker) -> impl Filter<Extract = (Broker,), Error = Infallible> + Clone {
    warp::any().map(move || broker.clone())
}

/// A size-limited request body that must be valid UTF-8.
fn text_body(limit: u64) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::body::content_length_limit(limit)
        .and(warp::body::bytes())
        .and_then(|body: Bytes| async move {
            String::from_utf8(body.to_vec())
                .map_err(|_| warp::reject::custom(ApiRejection::InvalidBody))
        })
}

async fn broadcast(message: String, broker: Broker) -> Result<StatusCode, Rejection> {
    broker.broadcast(message).map_err(reject_broker_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn publish(group: String, message: String, broker: Broker) -> Result<StatusCode, Rejection> {
    broker.publish(message, group).map_err(reject_broker_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn whisper(
    listener: ListenerId,
    message: String,
    broker: Broker,
) -> Result<StatusCode, Rejection> {
    broker.whisper(message, listener).map_err(reject_broker_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn join_group(
    group: String,
    listener: ListenerId,
    broker: Broker,
) -> Result<StatusCode, Rejection> {
    broker.join_group(group, listener).map_err(reject_broker_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_group(
    group: String,
    listener: ListenerId,
    broker: Broker,
) -> Result<StatusCode, Rejection> {
    broker.leave_group(group, listener).map_err(reject_broker_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disconnect(listener: ListenerId, broker: Broker) -> Result<StatusCode, Rejection> {
    if broker.disconnect(listener).await.map_err(reject_broker_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        debug!(%listener, "disconnect found no live session");
        Err(warp::reject::custom(ApiRejection::NotFound("Listener not connected")))
    }
}

async fn list_listeners(broker: Broker) -> Result<impl Reply, Rejection> {
    let mut listeners = broker.listeners().await.map_err(reject_broker_error)?;
    listeners.sort();
    Ok(warp::reply::json(&listeners))
}

async fn list_groups(broker: Broker) -> Result<impl Reply, Rejection> {
    let mut groups = broker.groups().await.map_err(reject_broker_error)?;
    groups.sort();
    Ok(warp::reply::json(&groups))
}

async fn group_members(group: String, broker: Broker) -> Result<impl Reply, Rejection> {
    let members = broker
        .group_members(group.as_str())
        .await
        .map_err(reject_broker_error)?;

    match members {
        Some(mut members) => {
            members.sort();
            Ok(warp::reply::json(&GroupView { group, members }))
        }
        None => Err(warp::reject::custom(ApiRejection::NotFound("Group not found"))),
    }
}

async fn recent_history(query: HistoryQuery, broker: Broker) -> Result<impl Reply, Rejection> {
    let limit = query.limit.unwrap_or(broker.config().history_size);
    let events = broker
        .recent_events(limit)
        .await
        .map_err(reject_broker_error)?;
    Ok(warp::reply::json(&events))
}

async fn history_event(id: u64, broker: Broker) -> Result<impl Reply, Rejection> {
    match broker
        .event(EventId::new(id))
        .await
        .map_err(reject_broker_error)?
    {
        Some(event) => Ok(warp::reply::json(&event)),
        None => Err(warp::reject::custom(ApiRejection::NotFound("Event not found"))),
    }
}

async fn stats(broker: Broker) -> Result<impl Reply, Rejection> {
    let stats = broker.stats().await.map_err(reject_broker_error)?;
    Ok(warp::reply::json(&stats))
}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if let Some(rejection) = err.find::<ApiRejection>() {
        match rejection {
            ApiRejection::InvalidBody => (StatusCode::BAD_REQUEST, "Body must be UTF-8 text"),
            ApiRejection::BrokerUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "Broker is not running")
            }
            ApiRejection::StreamingUnsupported => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Streaming is not supported")
            }
            ApiRejection::NotFound(what) => (StatusCode::NOT_FOUND, *what),
            ApiRejection::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        }
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Body too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(message, code))
}
