//! Integration-level coverage of the buffer pool driven through
//! `ProducerIngest`, rather than the pool's own unit tests which poke the
//! pool directly.

use std::sync::Arc;

use ras_cs::codec::{DoneStatus, RangingHeader, SubeventHeader};
use ras_cs::config::RasConfig;
use ras_cs::ingest::{ProcedureDoneStatus, ProducerIngest, SubeventResult};
use ras_cs::pool::RdBufferPool;
use ras_cs::types::{BufferKey, ConnectionId, RangingCounter};

fn subevent(counter: u16, start_acl: u16, step_data: &[u8], done: ProcedureDoneStatus) -> SubeventResult {
    SubeventResult {
        procedure_counter: RangingCounter::new(counter),
        config_id: 2,
        start_acl_conn_event: start_acl,
        freq_compensation: 10,
        ranging_done_status: DoneStatus::Partial,
        subevent_done_status: DoneStatus::Complete,
        ranging_abort_reason: 0,
        subevent_abort_reason: 0,
        ref_power_level: -15,
        num_steps_reported: 0,
        step_mode: Vec::new(),
        step_data: step_data.to_vec(),
        step_channel: Vec::new(),
        procedure_done_status: done,
    }
}

#[test]
fn multi_subevent_procedure_reassembles_into_a_flat_image() {
    let config = RasConfig::default();
    let pool = Arc::new(RdBufferPool::new(&config));
    let ingest = ProducerIngest::new(pool.clone(), &config);
    let conn = ConnectionId(1);
    let counter = RangingCounter::new(4);

    ingest.on_subevent(conn, &subevent(4, 1, &[1, 2, 3], ProcedureDoneStatus::Ongoing));
    ingest.on_subevent(conn, &subevent(4, 2, &[4, 5], ProcedureDoneStatus::Complete));

    let key = BufferKey::new(conn, counter);
    assert!(pool.ready_check(key));
    pool.claim(key).unwrap();

    let mut expected = Vec::new();
    RangingHeader { ranging_counter: counter, config_id: 2, selected_tx_power: 0, antenna_paths_mask: 1 }
        .encode(&mut expected)
        .unwrap();
    for (start_acl, data) in [(1u16, &[1u8, 2, 3][..]), (2u16, &[4u8, 5][..])] {
        SubeventHeader {
            start_acl_conn_event: start_acl,
            freq_compensation: 10,
            ranging_done_status: DoneStatus::Partial,
            subevent_done_status: DoneStatus::Complete,
            ranging_abort_reason: 0,
            subevent_abort_reason: 0,
            ref_power_level: -15,
            num_steps_reported: 0,
        }
        .encode(&mut expected)
        .unwrap();
        expected.extend_from_slice(data);
    }

    let mut pulled = Vec::new();
    loop {
        let mut chunk = vec![0u8; 7];
        let n = pool.pull(key, &mut chunk);
        if n == 0 {
            break;
        }
        chunk.truncate(n);
        pulled.extend_from_slice(&chunk);
    }
    assert_eq!(pulled, expected);
}

#[test]
fn rewind_replays_the_most_recent_pull() {
    let config = RasConfig::default();
    let pool = Arc::new(RdBufferPool::new(&config));
    let ingest = ProducerIngest::new(pool.clone(), &config);
    let conn = ConnectionId(2);
    let counter = RangingCounter::new(1);

    ingest.on_subevent(conn, &subevent(1, 0, &[9, 9, 9, 9], ProcedureDoneStatus::Complete));
    let key = BufferKey::new(conn, counter);

    let mut first = vec![0u8; 6];
    let n1 = pool.pull(key, &mut first);
    assert!(n1 > 0);

    pool.rewind(key, n1);

    let mut second = vec![0u8; 6];
    let n2 = pool.pull(key, &mut second);
    assert_eq!(n1, n2);
    assert_eq!(first, second);
}
