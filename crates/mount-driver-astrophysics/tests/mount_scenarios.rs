//! End-to-end scenarios: the mount state machine driving the Astro-Physics
//! driver against the simulated controller.

use chrono::{TimeZone, Utc};
use mount_core::sim::{Fault, SimTransport};
use mount_core::{
    Direction, EquatorialPosition, FixedClock, MemorySettingsStore, Motion, Mount, MountError,
    MountProtocol, MountSettings, MountState, ObserverLocation, TrackMode,
};
use mount_driver_astrophysics::{ApSimulator, AstroPhysicsMount};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    mount: Mount,
    sim: SimTransport<ApSimulator>,
    store: Arc<MemorySettingsStore>,
    clock: Arc<FixedClock>,
}

fn site() -> ObserverLocation {
    ObserverLocation::new(40.0, 250.0, 1500.0)
}

fn build(configure: impl FnOnce(&mut ApSimulator)) -> Harness {
    let mut device = ApSimulator::new();
    configure(&mut device);
    let sim = SimTransport::new(device);
    let driver = AstroPhysicsMount::new(Arc::new(sim.clone()))
        .with_park_probe_delay(Duration::from_millis(1));
    let protocol: Arc<dyn MountProtocol> = Arc::new(driver);
    let store = Arc::new(MemorySettingsStore::new(MountSettings::default()));
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 20, 3, 0, 0).unwrap(),
    ));
    let mount = Mount::new(protocol, store.clone(), clock.clone()).unwrap();
    Harness {
        mount,
        sim,
        store,
        clock,
    }
}

impl Harness {
    /// Let `secs` of wall time pass, then poll.
    async fn refresh_after(&mut self, secs: i64) -> mount_core::StatusReport {
        self.clock.advance(chrono::Duration::seconds(secs));
        self.mount.refresh().await.unwrap()
    }
}

async fn connected(configure: impl FnOnce(&mut ApSimulator)) -> Harness {
    let mut h = build(configure);
    h.mount.connect().await.unwrap();
    h.mount.update_location(site()).await.unwrap();
    h.mount
        .update_time(Utc.with_ymd_and_hms(2024, 3, 20, 3, 0, 0).unwrap(), -7.0)
        .await
        .unwrap();
    h.sim.clear_log();
    h
}

/// Index of each expected command in `commands`, asserting they appear in order.
fn assert_in_order(commands: &[String], expected: &[&str]) {
    let mut from = 0;
    for want in expected {
        let found = commands[from..]
            .iter()
            .position(|c| c == want)
            .unwrap_or_else(|| panic!("{} missing after index {} in {:?}", want, from, commands));
        from += found + 1;
    }
}

#[tokio::test]
async fn first_connect_initializes_once_time_and_location_are_known() {
    let mut h = build(|_| {});
    h.mount.connect().await.unwrap();
    h.mount.update_location(site()).await.unwrap();
    assert!(!h.mount.is_initialized());
    assert!(!h.sim.commands().contains(&":PO#".to_string()));

    h.mount
        .update_time(Utc.with_ymd_and_hms(2024, 3, 20, 3, 0, 0).unwrap(), -7.0)
        .await
        .unwrap();
    assert!(h.mount.is_initialized());

    let commands = h.sim.commands();
    assert_in_order(
        &commands,
        &[
            ":Sg 110*00#",
            ":St +40*00#",
            ":SL 20:00:00#",
            ":SC 03/19/24#",
            ":SG +07:00:00#",
            ":GOS#",
            ":PO#",
            ":Q#",
            ":RT2#",
            ":RC1#",
            ":RS0#",
            ":RG1#",
        ],
    );
    assert_eq!(commands.iter().filter(|c| *c == ":PO#").count(), 1);

    // A second time update does not rerun the sequence
    h.sim.clear_log();
    h.mount
        .update_time(Utc.with_ymd_and_hms(2024, 3, 20, 4, 0, 0).unwrap(), -7.0)
        .await
        .unwrap();
    assert!(!h.sim.commands().contains(&":PO#".to_string()));
}

#[tokio::test]
async fn goto_sets_ra_then_dec_then_slews() {
    let mut h = connected(|_| {}).await;
    h.mount.goto(EquatorialPosition::new(8.0, 20.0)).await.unwrap();

    assert_eq!(h.sim.commands(), vec![":Sr 08:00:00#", ":Sd +20*00:00#", ":MS#"]);
    assert!(matches!(h.mount.state(), MountState::Slewing { .. }));
}

#[tokio::test]
async fn second_goto_aborts_first() {
    let mut h = connected(|_| {}).await;
    h.mount.goto(EquatorialPosition::new(8.0, 20.0)).await.unwrap();
    h.sim.clear_log();

    h.mount.goto(EquatorialPosition::new(9.0, 30.0)).await.unwrap();
    assert_eq!(
        h.sim.commands(),
        vec![":Q#", ":Sr 09:00:00#", ":Sd +30*00:00#", ":MS#"]
    );
    match h.mount.state() {
        MountState::Slewing { target } => assert_eq!(target, EquatorialPosition::new(9.0, 30.0)),
        other => panic!("expected Slewing, got {:?}", other),
    }
}

#[tokio::test]
async fn slew_settles_into_tracking() {
    let mut h = connected(|_| {}).await;
    h.mount.goto(EquatorialPosition::new(8.0, 20.0)).await.unwrap();

    // Halfway, then at target but different from the previous poll
    h.refresh_after(1).await;
    h.refresh_after(1).await;
    assert!(matches!(h.mount.state(), MountState::Slewing { .. }));

    let status = h.refresh_after(1).await;
    assert!(matches!(status.state, MountState::Tracking { .. }));
    assert_eq!(status.position, Some(EquatorialPosition::new(8.0, 20.0)));
    assert!(status.horizontal.is_some());

    // The controller reports sky coordinates, so tracking holds them
    let later = h.refresh_after(60).await;
    assert_eq!(later.position, Some(EquatorialPosition::new(8.0, 20.0)));
    assert!(matches!(later.state, MountState::Tracking { .. }));
}

#[tokio::test]
async fn park_completes_once_and_stays_quiet() {
    let mut h = connected(|_| {}).await;
    h.mount.park().await.unwrap();
    assert_eq!(h.sim.commands(), vec![":Sz 000*00#", ":Sa +40*00#", ":MS#"]);

    for _ in 0..3 {
        h.refresh_after(1).await;
    }
    assert_eq!(h.mount.state(), MountState::Parked);
    assert!(h.store.snapshot().parked);
    assert!(!h.mount.is_tracking_enabled());

    let commands = h.sim.commands();
    assert_eq!(commands.iter().filter(|c| *c == ":KA#").count(), 1);
    assert_in_order(&commands, &[":KA#", ":RT9#"]);

    let saves = h.store.save_count();
    h.sim.clear_log();
    for _ in 0..3 {
        h.mount.refresh().await.unwrap();
    }
    assert_eq!(h.store.save_count(), saves);
    let polls = [":GR#", ":GD#", ":GZ#", ":GA#", ":pS#"];
    assert!(h
        .sim
        .commands()
        .iter()
        .all(|c| polls.contains(&c.as_str())));

    h.mount.unpark().await.unwrap();
    assert_eq!(h.mount.state(), MountState::Idle);
    assert!(!h.store.snapshot().parked);
}

#[tokio::test]
async fn revision_e_reasserts_guide_rate_after_jog() {
    let mut h = connected(|d| d.version = "E".to_string()).await;
    assert!(h.mount.guide_rate_quirk().is_enabled());

    h.mount.jog(Direction::North, Motion::Start).await.unwrap();
    h.mount.jog(Direction::North, Motion::Stop).await.unwrap();
    assert_eq!(h.sim.commands(), vec![":RC1#", ":Mn#", ":Qn#"]);

    h.sim.clear_log();
    h.mount
        .pulse_guide(Direction::South, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(h.sim.commands(), vec![":RG1#", ":Ms100#"]);

    h.sim.clear_log();
    h.mount
        .pulse_guide(Direction::South, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(h.sim.commands(), vec![":Ms100#"]);
}

#[tokio::test]
async fn later_revisions_do_not_resend_guide_rate() {
    let mut h = connected(|_| {}).await;
    h.mount.jog(Direction::East, Motion::Start).await.unwrap();
    h.mount.jog(Direction::East, Motion::Stop).await.unwrap();
    h.sim.clear_log();

    h.mount
        .pulse_guide(Direction::West, Duration::from_millis(40))
        .await
        .unwrap();
    assert_eq!(h.sim.commands(), vec![":Mw040#"]);
}

#[tokio::test]
async fn short_position_reply_keeps_state() {
    let mut h = connected(|_| {}).await;
    h.mount.goto(EquatorialPosition::new(8.0, 20.0)).await.unwrap();
    let before = h.mount.state();

    h.sim.inject_on(":GR#", Fault::Reply(b"08:00".to_vec()));
    let err = h.mount.refresh().await.unwrap_err();
    assert!(matches!(&err, MountError::Telemetry(msg) if msg.contains("Protocol")));
    assert_eq!(h.mount.state(), before);
    assert!(h.mount.is_degraded());

    h.mount.refresh().await.unwrap();
    assert!(!h.mount.is_degraded());
}

#[tokio::test]
async fn parked_mount_rejects_motion_without_io() {
    let mut h = connected(|_| {}).await;
    h.mount.park().await.unwrap();
    for _ in 0..3 {
        h.mount.refresh().await.unwrap();
    }
    h.sim.clear_log();

    assert!(matches!(
        h.mount.goto(EquatorialPosition::new(1.0, 1.0)).await,
        Err(MountError::InvalidState { .. })
    ));
    assert!(h.mount.jog(Direction::West, Motion::Start).await.is_err());
    h.mount.abort().await.unwrap();
    h.mount.set_track_mode(TrackMode::Lunar).await.unwrap();
    assert!(h.sim.commands().is_empty());
    assert_eq!(h.mount.state(), MountState::Parked);
}

#[tokio::test]
async fn sync_updates_position_without_motion() {
    let mut h = connected(|_| {}).await;
    h.mount.sync(EquatorialPosition::new(6.0, -10.0)).await.unwrap();
    assert_eq!(
        h.sim.commands(),
        vec![":Sr 06:00:00#", ":Sd -10*00:00#", ":CM#"]
    );
    assert_eq!(h.sim.device().position(), EquatorialPosition::new(6.0, -10.0));
    assert_eq!(
        h.mount.status().position,
        Some(EquatorialPosition::new(6.0, -10.0))
    );
}
