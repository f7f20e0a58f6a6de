//! End-to-end behaviour of the index through its public API.

use pretty_assertions::assert_eq;
use rewind_cache::{Handle, MemoryCache};
use rewind_index::chunk::{ChunkSection, Column};
use rewind_index::playback::PlaybackTree;
use rewind_index::tree::StateTreeBuilder;
use rewind_index::{ClientMirror, IndexError, ORIGIN, PacketSink, Seeker, Time, analyze};
use rewind_packets::{
    BlockState, BlockUpdate, ByteArray, ChangeDifficulty, ChunkData, JoinGame, JoinSettings,
    Location, Packet, PlayerPosition, Position, RemoveEntities, Respawn, SetTime, SpawnEntity,
    Uuid, VarInt,
};

fn clock(t: i64) -> Packet {
    Packet::from(SetTime {
        world_age: t,
        time_of_day: t,
    })
}

fn join(entity_id: i32) -> Packet {
    Packet::from(JoinGame {
        settings: JoinSettings {
            entity_id,
            view_distance: VarInt(10),
            ..JoinSettings::default()
        },
        respawn: Respawn {
            dimension: "minecraft:overworld".to_owned(),
            ..Respawn::default()
        },
    })
}

fn spawn(id: i32) -> Packet {
    Packet::from(SpawnEntity {
        entity_id: VarInt(id),
        uuid: Uuid(id as u128),
        kind: VarInt(0),
        location: Location::new(f64::from(id), 70.0, 0.0, 0.0, 0.0),
    })
}

fn remove(id: i32) -> Packet {
    Packet::from(RemoveEntities {
        entity_ids: vec![VarInt(id)],
    })
}

fn empty_chunk() -> Packet {
    let column = Column::new(vec![ChunkSection::empty(0)]);
    Packet::from(ChunkData {
        x: 0,
        z: 0,
        data: ByteArray(column.encode().unwrap()),
    })
}

fn block(position: Position, state: i32) -> Packet {
    Packet::from(BlockUpdate {
        position,
        state: BlockState(state),
    })
}

/// Mirror after applying every packet up to and including `time`.
fn linear(recording: &[(Time, Packet)], time: Time) -> ClientMirror {
    let mut mirror = ClientMirror::new();
    for (_, packet) in recording.iter().take_while(|(t, _)| *t <= time) {
        mirror.apply(packet);
    }
    mirror
}

fn index(recording: &[(Time, Packet)]) -> (MemoryCache, Handle) {
    let mut cache = MemoryCache::new();
    let root = analyze(&mut cache, recording).unwrap();
    (cache, root)
}

#[test]
fn test_tree_plays_every_value_once_in_order() {
    let mut cache = MemoryCache::new();
    let mut builder = StateTreeBuilder::new();
    for t in [0, 7, 7_000, 90_000] {
        builder.put(t, clock(t));
    }
    let handle = builder.build(&mut cache).unwrap();

    let mut tree = PlaybackTree::diff(
        handle,
        |packet: &Packet, sink| sink.accept(packet.clone()),
        |_: &Packet, _| {},
    );
    tree.load(&cache).unwrap();
    let mut out: Vec<Packet> = Vec::new();
    tree.play(&mut out, Time::MIN, Time::MAX).unwrap();
    assert_eq!(out, vec![clock(0), clock(7), clock(7_000), clock(90_000)]);
}

#[test]
fn test_reloading_changes_nothing() {
    let mut cache = MemoryCache::new();
    let mut builder = StateTreeBuilder::new();
    builder.put(10, clock(10));
    builder.put(20, clock(20));
    let handle = builder.build(&mut cache).unwrap();

    let mut tree = PlaybackTree::full(handle, |packet: &Packet, sink| {
        sink.accept(packet.clone());
    });
    tree.load(&cache).unwrap();
    tree.load(&cache).unwrap();
    let mut first: Vec<Packet> = Vec::new();
    tree.play(&mut first, ORIGIN, 15).unwrap();

    tree.unload();
    assert!(matches!(
        tree.play(&mut Vec::<Packet>::new(), ORIGIN, 15),
        Err(IndexError::NotLoaded(_))
    ));
    tree.load(&cache).unwrap();
    let mut second: Vec<Packet> = Vec::new();
    tree.play(&mut second, ORIGIN, 15).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_block_changes_rewind_to_start() {
    let pos = Position::new(4, 5, 6);
    let recording = vec![
        (0, join(1)),
        (0, empty_chunk()),
        (10, block(pos, 5)),
        (20, block(pos, 0)),
    ];
    let (cache, root) = index(&recording);

    let mut seeker = Seeker::open(&cache, root).unwrap();
    let mut mirror = ClientMirror::new();
    seeker.seek(&cache, &mut mirror, 0).unwrap();
    let start = mirror.clone();

    seeker.seek(&cache, &mut mirror, 15).unwrap();
    assert_eq!(mirror.chunks[&(0, 0)].block(pos, 0), Some(BlockState(5)));
    seeker.seek(&cache, &mut mirror, 25).unwrap();
    seeker.seek(&cache, &mut mirror, 0).unwrap();
    assert_eq!(mirror, start);
}

#[test]
fn test_same_millisecond_changes_rewind_in_reverse() {
    let pos = Position::new(1, 1, 1);
    let recording = vec![
        (0, join(1)),
        (0, empty_chunk()),
        (10, block(pos, 5)),
        (10, block(pos, 7)),
        (10, block(pos, 0)),
        (10, block(pos, 3)),
    ];
    let (cache, root) = index(&recording);

    let mut seeker = Seeker::open(&cache, root).unwrap();
    let mut mirror = ClientMirror::new();
    seeker.seek(&cache, &mut mirror, 10).unwrap();
    assert_eq!(mirror.chunks[&(0, 0)].block(pos, 0), Some(BlockState(3)));

    let mut out: Vec<Packet> = Vec::new();
    seeker.seek(&cache, &mut out, 5).unwrap();
    assert_eq!(
        out,
        vec![block(pos, 0), block(pos, 7), block(pos, 5), block(pos, 0)]
    );
    for packet in &out {
        mirror.apply(packet);
    }
    assert_eq!(mirror, linear(&recording, 5));
}

#[test]
fn test_full_tree_emits_latest_snapshot() {
    let mut cache = MemoryCache::new();
    let mut builder = StateTreeBuilder::new();
    builder.put(100, clock(100));
    builder.put(200, clock(200));
    let mut tree = PlaybackTree::full(builder.build(&mut cache).unwrap(), |p: &Packet, sink| {
        sink.accept(p.clone());
    });
    tree.load(&cache).unwrap();

    let mut out: Vec<Packet> = Vec::new();
    tree.play(&mut out, 0, 150).unwrap();
    assert_eq!(out, vec![clock(100)]);
    out.clear();
    tree.play(&mut out, 150, 250).unwrap();
    assert_eq!(out, vec![clock(200)]);
    out.clear();
    tree.play(&mut out, 250, 600).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_cold_jump_builds_active_set() {
    let recording = vec![
        (0, join(100)),
        (0, spawn(1)),
        (50, spawn(2)),
        (100, remove(1)),
        (120, spawn(3)),
        (150, remove(2)),
        (200, remove(3)),
    ];
    let (cache, root) = index(&recording);

    let mut seeker = Seeker::open(&cache, root).unwrap();
    let mut mirror = ClientMirror::new();
    seeker.seek(&cache, &mut mirror, 130).unwrap();
    let ids: Vec<i32> = mirror.entities.keys().copied().collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(mirror, linear(&recording, 130));
}

#[test]
fn test_switch_rejoins_and_restores_tags() {
    let hard = Packet::from(ChangeDifficulty {
        difficulty: 3,
        locked: true,
    });
    let recording = vec![
        (0, join(1)),
        (5, hard.clone()),
        (30, clock(30)),
        (100, join(2)),
        (110, clock(110)),
    ];
    let (cache, root) = index(&recording);

    let mut seeker = Seeker::open(&cache, root).unwrap();
    seeker
        .seek(&cache, &mut Vec::<Packet>::new(), 150)
        .unwrap();

    let mut out: Vec<Packet> = Vec::new();
    seeker.seek(&cache, &mut out, 50).unwrap();
    let Packet::JoinGame(rejoin) = &out[1] else {
        panic!("expected a join, got {}", out[1].name());
    };
    assert_eq!(rejoin.settings.entity_id, 1);
    assert_eq!(
        out[..5],
        [
            hard.clone(),
            out[1].clone(),
            hard,
            Packet::from(rejoin.respawn.clone()),
            Packet::from(PlayerPosition::neutral()),
        ]
    );
    assert!(out[5..].contains(&clock(30)));

    let mut mirror = ClientMirror::new();
    let mut fresh = Seeker::open(&cache, root).unwrap();
    fresh.seek(&cache, &mut mirror, 150).unwrap();
    for packet in out {
        mirror.apply(&packet);
    }
    assert_eq!(mirror, linear(&recording, 50));
}

#[test]
fn test_failed_seek_poisons() {
    let (cache, root) = index(&[(0, join(1))]);
    let mut seeker = Seeker::open(&cache, root).unwrap();
    assert!(matches!(
        seeker.seek(&cache, &mut Vec::<Packet>::new(), -5),
        Err(IndexError::NegativeTime(-5))
    ));
    assert!(!seeker.is_poisoned());

    // a cache that lost its bytes fails the first load
    let empty = MemoryCache::new();
    let mut out: Vec<Packet> = Vec::new();
    assert!(seeker.seek(&empty, &mut out, 10).is_err());
    assert!(seeker.is_poisoned());
    assert!(matches!(
        seeker.seek(&cache, &mut out, 10),
        Err(IndexError::Poisoned)
    ));
}

#[test]
fn test_sink_trait_object() {
    struct Counter(usize);

    impl PacketSink for Counter {
        fn accept(&mut self, _: Packet) {
            self.0 += 1;
        }
    }

    let (cache, root) = index(&[(0, join(1)), (3, spawn(4))]);
    let mut seeker = Seeker::open(&cache, root).unwrap();
    let mut counter = Counter(0);
    seeker.seek(&cache, &mut counter, 3).unwrap();
    assert!(counter.0 > 0);
    assert_eq!(seeker.current(), Some(3));
}
