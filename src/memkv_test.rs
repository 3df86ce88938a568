use std::thread;

use super::*;

#[test]
fn test_get_scan() {
    let kv = MemKv::new();
    kv.add_part(1, 1);

    let mut batch = WriteBatch::new();
    batch.put(b"a1".to_vec(), b"v1".to_vec());
    batch.put(b"a2".to_vec(), b"v2".to_vec());
    batch.put(b"b1".to_vec(), b"v3".to_vec());
    let rx = kv.async_append(1, 1, batch).unwrap();
    assert_eq!(rx.recv().unwrap(), AppendReply::Ok);

    assert_eq!(kv.get(1, 1, b"a1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(kv.get(1, 1, b"zz").unwrap(), None);
    assert!(kv.get(1, 9, b"a1").is_err());

    let pairs = kv.scan_prefix(1, 1, b"a").unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].0, b"a1".to_vec());
    assert_eq!(pairs[1].0, b"a2".to_vec());
}

#[test]
fn test_last_op_wins() {
    let kv = MemKv::new();
    kv.add_part(1, 1);

    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"v1".to_vec());
    batch.remove(b"k".to_vec());
    batch.put(b"k".to_vec(), b"v2".to_vec());
    kv.async_append(1, 1, batch).unwrap().recv().unwrap();
    assert_eq!(kv.get(1, 1, b"k").unwrap(), Some(b"v2".to_vec()));

    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"v3".to_vec());
    batch.remove(b"k".to_vec());
    kv.async_append(1, 1, batch).unwrap().recv().unwrap();
    assert_eq!(kv.get(1, 1, b"k").unwrap(), None);
}

#[test]
fn test_leader_simulation() {
    let kv = MemKv::new();
    kv.add_part(1, 1);
    assert_eq!(kv.leader(1, 1), None);

    let addr = HostAddr::new("peer-2", 44500);
    kv.set_remote_leader(1, 1, Some(addr.clone())).unwrap();
    assert_eq!(kv.leader(1, 1), Some(addr.clone()));

    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"v".to_vec());
    let rx = kv.async_append(1, 1, batch).unwrap();
    assert_eq!(
        rx.recv().unwrap(),
        AppendReply::LeaderChanged {
            leader: Some(addr)
        }
    );
    // refused appends leave nothing behind
    assert_eq!(kv.part_len(1, 1).unwrap(), 0);

    kv.make_local(1, 1).unwrap();
    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"v".to_vec());
    let rx = kv.async_append(1, 1, batch).unwrap();
    assert_eq!(rx.recv().unwrap(), AppendReply::Ok);
}

#[test]
fn test_inject_reply() {
    let kv = MemKv::new();
    kv.add_part(1, 1);
    kv.inject_reply(1, 1, AppendReply::Timeout).unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"v".to_vec());
    let rx = kv.async_append(1, 1, batch).unwrap();
    assert_eq!(rx.recv().unwrap(), AppendReply::Timeout);
    assert_eq!(kv.part_len(1, 1).unwrap(), 0);

    // one-shot: the next append goes through
    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"v".to_vec());
    let rx = kv.async_append(1, 1, batch).unwrap();
    assert_eq!(rx.recv().unwrap(), AppendReply::Ok);
}

#[test]
fn test_batch_atomicity() {
    let kv = Arc::new(MemKv::new());
    kv.add_part(1, 1);

    // writer flips both keys together; readers must never see them split
    let writer = {
        let kv = Arc::clone(&kv);
        thread::spawn(move || {
            for i in 0..500_u64 {
                let mut batch = WriteBatch::new();
                batch.put(b"x".to_vec(), i.to_le_bytes().to_vec());
                batch.put(b"y".to_vec(), i.to_le_bytes().to_vec());
                kv.async_append(1, 1, batch).unwrap().recv().unwrap();
            }
        })
    };
    let reader = {
        let kv = Arc::clone(&kv);
        thread::spawn(move || {
            for _ in 0..500 {
                // one scan holds the latch once, so it sees a batch
                // either fully applied or not at all
                let pairs = kv.scan_prefix(1, 1, b"").unwrap();
                if pairs.len() == 2 {
                    assert_eq!(pairs[0].1, pairs[1].1);
                }
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
}
