//! Reads and writes of call records.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::protocol::{
    fields, paths, CallRecord, CallStatus, CandidateSide, IceCandidate, SessionDescription,
};
use crate::store::{SharedStore, StoreError};

use super::types::CallError;

fn write_failed(e: impl std::fmt::Display) -> CallError {
    CallError::SignalingWriteFailed(e.to_string())
}

/// Every readable record in the `calls` collection, keyed by call id.
pub(crate) fn parse_calls(calls: &Value) -> BTreeMap<String, CallRecord> {
    calls
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(id, value)| Some((id.clone(), CallRecord::from_value(id, value)?)))
                .collect()
        })
        .unwrap_or_default()
}

/// Write a new pending record, offer included, in one merge.
pub(crate) async fn write_offer(store: &dyn SharedStore, record: &CallRecord) -> Result<(), CallError> {
    let changes = match serde_json::to_value(record).map_err(write_failed)? {
        Value::Object(map) => map,
        _ => return Err(write_failed("call record did not encode as an object")),
    };
    store
        .update(&paths::call(&record.id), changes)
        .await
        .map_err(write_failed)
}

/// Publish the answer and flip the record to active.
pub(crate) async fn write_answer(
    store: &dyn SharedStore,
    call_id: &str,
    answer: &SessionDescription,
) -> Result<(), CallError> {
    let mut changes = Map::new();
    changes.insert(
        fields::ANSWER.to_string(),
        serde_json::to_value(answer).map_err(write_failed)?,
    );
    changes.insert(
        fields::STATUS.to_string(),
        serde_json::to_value(CallStatus::Active).map_err(write_failed)?,
    );
    store
        .update(&paths::call(call_id), changes)
        .await
        .map_err(write_failed)
}

pub(crate) async fn append_candidate(
    store: &dyn SharedStore,
    call_id: &str,
    side: CandidateSide,
    candidate: &IceCandidate,
) -> Result<String, CallError> {
    let value = serde_json::to_value(candidate).map_err(write_failed)?;
    store
        .push(&paths::candidates(call_id, side), value)
        .await
        .map_err(write_failed)
}

/// Read one record. `Ok(None)` when it is absent or unreadable.
pub(crate) async fn load_call(store: &dyn SharedStore, call_id: &str) -> Result<Option<CallRecord>, CallError> {
    let value = store
        .get(&paths::call(call_id))
        .await
        .map_err(|e| CallError::SignalingReadFailed(e.to_string()))?;
    Ok(CallRecord::from_value(call_id, &value))
}

pub(crate) async fn delete_call(store: &dyn SharedStore, call_id: &str) -> Result<(), StoreError> {
    store.remove(&paths::call(call_id)).await
}

/// Remove whatever is still stored under a record the peer deleted, such
/// as a candidate pushed just before the deletion was seen.
///
/// Returns whether anything was removed.
pub(crate) async fn remove_leftover(store: &dyn SharedStore, call_id: &str) -> Result<bool, StoreError> {
    let path = paths::call(call_id);
    if store.get(&path).await?.is_null() {
        return Ok(false);
    }
    match store.remove(&path).await {
        Ok(()) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SdpKind;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn pending(id: &str) -> CallRecord {
        CallRecord {
            id: id.into(),
            room_id: "R1".into(),
            caller_id: "a".into(),
            callee_id: "b".into(),
            status: CallStatus::Pending,
            offer: Some(SessionDescription {
                kind: SdpKind::Offer,
                sdp: "v=0 offer".into(),
            }),
            answer: None,
            offer_candidates: BTreeMap::new(),
            answer_candidates: BTreeMap::new(),
            created_at: 10,
        }
    }

    #[tokio::test]
    async fn offer_answer_and_candidates_round_trip_through_store() {
        let store = MemoryStore::new();
        let conn = store.connect();

        write_offer(&conn, &pending("c1")).await.unwrap();
        let candidate = IceCandidate {
            candidate: "candidate:0".into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        append_candidate(&conn, "c1", CandidateSide::Offer, &candidate)
            .await
            .unwrap();
        let answer = SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0 answer".into(),
        };
        write_answer(&conn, "c1", &answer).await.unwrap();

        let record = load_call(&conn, "c1").await.unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Active);
        assert_eq!(record.answer, Some(answer));
        assert_eq!(record.offer_candidates.len(), 1);
        assert_eq!(store.read("calls/c1/status"), json!("active"));
    }

    #[test]
    fn parse_skips_unreadable_records() {
        let calls = json!({
            "c1": serde_json::to_value(pending("c1")).unwrap(),
            "c2": { "answerCandidates": { "k": { "candidate": "x" } } },
        });
        let parsed = parse_calls(&calls);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["c1"].caller_id, "a");
    }

    #[tokio::test]
    async fn leftover_candidates_are_removed_once() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let candidate = IceCandidate {
            candidate: "candidate:0".into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        append_candidate(&conn, "c1", CandidateSide::Answer, &candidate)
            .await
            .unwrap();

        assert!(remove_leftover(&conn, "c1").await.unwrap());
        assert_eq!(store.read(&paths::call("c1")), Value::Null);
        assert!(!remove_leftover(&conn, "c1").await.unwrap());
        assert_eq!(store.removal_attempts(&paths::call("c1")), 1);
    }

    #[tokio::test]
    async fn write_failure_maps_to_signaling_error() {
        let store = MemoryStore::new();
        let conn = store.connect();
        store.fail_writes_under("calls");

        let err = write_offer(&conn, &pending("c1")).await.unwrap_err();
        assert!(matches!(err, CallError::SignalingWriteFailed(_)));
    }
}
