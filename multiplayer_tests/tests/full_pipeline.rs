// End-to-end integration tests for the multiplayer pipeline.
//
// Each test starts a real hub, connects real `ClientSession`s (via
// `TestGameClient`, over TCP or the in-process transport) and verifies the
// full path: join → world transfer → command → scheduled execution on every
// peer at the same tick.
//
// These tests exercise the same code paths as a live game; the only
// test-specific code is the toy world and the pumping loop in
// `multiplayer_tests`.

use std::collections::BTreeSet;
use std::time::Duration;

use multiplayer_tests::{TestGameClient, init_logging, pump_until};
use tandem_hub::{MemoryStore, ServerHandle, ServerSettings, start_server};
use tandem_protocol::{CommandKind, GAME_KIND_BASE, UnitId};

fn start_hub(id_block_size: i32) -> (ServerHandle, std::net::SocketAddr) {
    init_logging();
    let settings = ServerSettings {
        address: "127.0.0.1:0".into(),
        host_username: Some("Host".into()),
        id_block_size,
        ..ServerSettings::default()
    };
    start_server(settings, Box::new(MemoryStore::default())).unwrap()
}

/// Host over TCP, a joiner in-process; both settled.
fn start_test_session() -> (ServerHandle, TestGameClient, TestGameClient) {
    let (handle, addr) = start_hub(1000);
    let mut host = TestGameClient::join_tcp(addr, "Host", true);
    pump_until(&mut [&mut host], "host to settle", |c| c[0].is_settled());
    let mut joiner = TestGameClient::join_local(&handle, "Joiner", false);
    pump_until(&mut [&mut host, &mut joiner], "joiner to settle", |c| {
        c.iter().all(|c| c.is_settled())
    });
    (handle, host, joiner)
}

/// A command from either side runs on both peers at issue tick + delay.
#[test]
fn commands_run_on_the_same_tick_everywhere() {
    let (handle, mut host, mut joiner) = start_test_session();

    host.send_game(1, b"from host");
    joiner.send_game(2, b"from joiner");
    pump_until(&mut [&mut host, &mut joiner], "both commands", |c| {
        c.iter().all(|c| c.game_ledger().len() == 2)
    });

    let ledger = host.game_ledger();
    assert_eq!(ledger, joiner.game_ledger());
    let kinds: BTreeSet<i32> = ledger.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, BTreeSet::from([GAME_KIND_BASE + 1, GAME_KIND_BASE + 2]));

    handle.stop();
}

/// Pause stops every peer on the same tick; Unpause lets them all go on.
#[test]
fn pause_and_unpause_reach_every_peer() {
    let (handle, mut host, mut joiner) = start_test_session();

    host.session
        .request(CommandKind::Pause, UnitId::GLOBAL, Vec::new())
        .unwrap();
    pump_until(&mut [&mut host, &mut joiner], "both peers to pause", |c| {
        c.iter().all(|c| c.world.paused)
    });
    let paused_at = host.world.tick;
    assert_eq!(joiner.world.tick, paused_at);

    for _ in 0..20 {
        host.step().unwrap();
        joiner.step().unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(host.world.tick, paused_at);
    assert_eq!(joiner.world.tick, paused_at);

    // Commands still arrive while paused and run at the paused tick.
    host.send_game(4, b"while paused");
    host.session
        .request(CommandKind::Unpause, UnitId::GLOBAL, Vec::new())
        .unwrap();
    pump_until(&mut [&mut host, &mut joiner], "both peers to resume", |c| {
        c.iter()
            .all(|c| !c.world.paused && c.world.tick > paused_at + 10)
    });
    assert_eq!(host.game_ledger(), joiner.game_ledger());
    assert_eq!(host.game_ledger()[0].tick, paused_at);

    handle.stop();
}

/// A player joining after an autosave loads the saved world and replays the
/// commands logged since, ending with the same ledger as the host.
#[test]
fn late_joiner_catches_up_from_autosave() {
    let (handle, addr) = start_hub(1000);
    let mut host = TestGameClient::join_tcp(addr, "Host", true);
    pump_until(&mut [&mut host], "host to settle", |c| c[0].is_settled());

    host.send_game(1, b"before save");
    pump_until(&mut [&mut host], "first command", |c| {
        c[0].game_ledger().len() == 1
    });

    handle.enqueue(|hub| {
        hub.do_autosave();
    });
    pump_until(&mut [&mut host], "autosave", |c| c[0].world.autosaves == 1);

    host.send_game(2, b"after save");
    pump_until(&mut [&mut host], "second command", |c| {
        c[0].game_ledger().len() == 2
    });

    let mut late = TestGameClient::join_tcp(addr, "Late", false);
    pump_until(&mut [&mut host, &mut late], "late joiner to catch up", |c| {
        c[1].is_settled() && c[1].game_ledger().len() == 2
    });

    assert_eq!(late.game_ledger(), host.game_ledger());
    assert!(late.world.tick > 0);

    handle.stop();
}

/// The attacker gets the defender's map through the hub, and the encounter
/// barrier releases both peers afterwards.
#[test]
fn encounter_hands_the_defenders_map_to_the_attacker() {
    let (handle, mut host, mut joiner) = start_test_session();

    joiner.session.request_encounter("Host", 5).unwrap();
    pump_until(&mut [&mut host, &mut joiner], "map exchange", |c| {
        c[1].world.maps_loaded.len() == 1
    });
    pump_until(&mut [&mut host, &mut joiner], "encounter to end", |c| {
        c.iter().all(|c| c.is_settled())
    });

    assert_eq!(joiner.world.maps_loaded, vec![b"map:5".to_vec()]);

    handle.stop();
}

/// Ids drawn by different peers, including across refills, never collide.
#[test]
fn id_blocks_never_overlap() {
    let (handle, addr) = start_hub(8);
    let mut host = TestGameClient::join_tcp(addr, "Host", true);
    pump_until(&mut [&mut host], "host to settle", |c| c[0].is_settled());
    let mut joiner = TestGameClient::join_tcp(addr, "Joiner", false);
    pump_until(&mut [&mut host, &mut joiner], "joiner to settle", |c| {
        c.iter().all(|c| c.is_settled())
    });

    // Blocks of 8 force a couple of refills per peer.
    let mut drawn: Vec<Vec<i32>> = vec![Vec::new(), Vec::new()];
    for _ in 0..20 {
        for (i, client) in [&mut host, &mut joiner].into_iter().enumerate() {
            loop {
                if let Some(id) = client.session.next_object_id().unwrap() {
                    drawn[i].push(id);
                    break;
                }
                client.step().unwrap();
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    let host_ids: BTreeSet<i32> = drawn[0].iter().copied().collect();
    let joiner_ids: BTreeSet<i32> = drawn[1].iter().copied().collect();
    assert_eq!(host_ids.len(), 20);
    assert_eq!(joiner_ids.len(), 20);
    assert!(host_ids.is_disjoint(&joiner_ids));

    handle.stop();
}

/// Chat and world objects reach the other peer; leaving is announced.
#[test]
fn chat_objects_and_departure_reach_the_other_peer() {
    let (handle, mut host, mut joiner) = start_test_session();

    joiner.session.chat("hello").unwrap();
    joiner.session.announce_object(vec![4, 2]).unwrap();
    pump_until(&mut [&mut host, &mut joiner], "chat and object", |c| {
        !c[0].world.objects.is_empty() && c[0].world.messages.iter().any(|m| m == "Joiner: hello")
    });
    assert_eq!(host.world.objects, vec![vec![4, 2]]);

    joiner.session.quit(b"joiner maps".to_vec()).unwrap();
    pump_until(&mut [&mut host], "departure notice", |c| {
        c[0]
            .world
            .messages
            .iter()
            .any(|m| m == "MpPlayerDisconnected: Joiner")
    });

    handle.stop();
}
