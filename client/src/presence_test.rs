use super::*;

fn avatar(client_id: &str, mural_id: u32, x: f32) -> AvatarData {
    AvatarData {
        client_id: client_id.into(),
        x,
        y: 1.6,
        z: 0.0,
        username: format!("user-{client_id}"),
        mural_id,
    }
}

fn tracker() -> PresenceTracker {
    PresenceTracker::new("me", "self", 1, Duration::from_secs(10))
}

#[test]
fn updates_track_latest_position() {
    let mut t = tracker();
    let now = Instant::now();

    t.on_update(&avatar("c1", 1, 1.0), now);
    t.on_update(&avatar("c1", 1, 2.5), now);

    assert_eq!(t.len(), 1);
    let remote = t.get("c1").unwrap();
    assert_eq!(remote.position, Vec3::new(2.5, 1.6, 0.0));
    assert_eq!(remote.username, "user-c1");
}

#[test]
fn own_echo_is_ignored() {
    let mut t = tracker();
    t.on_update(&avatar("me", 1, 1.0), Instant::now());
    assert!(t.is_empty());
}

#[test]
fn other_mural_updates_are_ignored() {
    let mut t = tracker();
    t.on_update(&avatar("c1", 2, 1.0), Instant::now());
    assert!(t.is_empty());
}

#[test]
fn sweep_evicts_silent_peers_exactly_once() {
    let mut t = tracker();
    let start = Instant::now();
    t.on_update(&avatar("c1", 1, 1.0), start);
    t.on_update(&avatar("c2", 1, 2.0), start);

    // c2 heartbeats again halfway through the window.
    let later = start + Duration::from_secs(6);
    t.on_update(&avatar("c2", 1, 2.1), later);

    let deadline = start + Duration::from_secs(11);
    let evicted = t.sweep(deadline);
    assert_eq!(evicted, vec!["c1".to_string()]);
    assert!(t.get("c1").is_none());
    assert!(t.get("c2").is_some());

    assert!(t.sweep(deadline).is_empty());
}

#[test]
fn sweep_before_timeout_keeps_everyone() {
    let mut t = tracker();
    let start = Instant::now();
    t.on_update(&avatar("c1", 1, 1.0), start);

    assert!(t.sweep(start + Duration::from_secs(9)).is_empty());
    assert_eq!(t.len(), 1);
}

#[test]
fn disconnect_removes_immediately() {
    let mut t = tracker();
    t.on_update(&avatar("c1", 1, 1.0), Instant::now());

    assert!(t.on_disconnect("c1"));
    assert!(t.is_empty());
    assert!(!t.on_disconnect("c1"));
}

#[test]
fn switch_mural_clears_and_returns_notice_for_old_mural() {
    let mut t = tracker();
    t.on_update(&avatar("c1", 1, 1.0), Instant::now());

    let notice = t.switch_mural(2).unwrap();
    assert_eq!(notice.mural_id, 1);
    assert_eq!(notice.client_id, "me");

    assert_eq!(t.mural_id(), 2);
    assert!(t.is_empty());

    // Updates for the new mural now land; the old mural's are ignored.
    t.on_update(&avatar("c3", 2, 1.0), Instant::now());
    t.on_update(&avatar("c1", 1, 1.0), Instant::now());
    assert_eq!(t.len(), 1);
    assert!(t.get("c3").is_some());
}

#[test]
fn switch_to_same_mural_is_a_noop() {
    let mut t = tracker();
    t.on_update(&avatar("c1", 1, 1.0), Instant::now());

    assert!(t.switch_mural(1).is_none());
    assert_eq!(t.len(), 1);
}

#[test]
fn heartbeat_carries_own_identity() {
    let t = tracker();
    let beat = t.heartbeat(Vec3::new(0.5, 1.7, -0.3));
    assert_eq!(beat.client_id, "me");
    assert_eq!(beat.username, "self");
    assert_eq!(beat.mural_id, 1);
    assert_eq!(beat.position(), [0.5, 1.7, -0.3]);
}
