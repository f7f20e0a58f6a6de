//! Index a packet recording and show what a client would see at chosen times.
//!
//! ```text
//! rewind <recording.json> <time-ms>...
//! ```
//!
//! The recording is a JSON object `{ "packets": [{ "time": 0, "packet": { ... } }, ...] }`.
//! Times are visited in the order given, so `rewind rec.json 60000 1000` plays forward to a
//! minute and then rewinds.
//!
//! Environment:
//! - `REWIND_CACHE` - index file to create; the index stays in memory when unset
//! - `REWIND_COMPRESSION_THRESHOLD` - frame size to start compressing at, or `off`
//! - `RUST_LOG` - log filter, `rewind=info` by default

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use eyre::{WrapErr, bail};
use rewind_cache::{CacheConfig, FileCache, MemoryCache, ReadCache, WriteCache};
use rewind_index::{Analyzer, ClientMirror, PacketSink, Seeker, Time};
use rewind_packets::Packet;
use serde::Deserialize;
use tracing::{info, trace};

#[derive(Debug, Deserialize)]
struct Recording {
    packets: Vec<RecordedPacket>,
}

#[derive(Debug, Deserialize)]
struct RecordedPacket {
    time: Time,
    packet: Packet,
}

#[derive(Debug)]
struct Config {
    cache_path: Option<PathBuf>,
    cache: CacheConfig,
}

impl Config {
    fn from_env() -> eyre::Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let cache_path = var("REWIND_CACHE").map(PathBuf::from);

        let mut cache = CacheConfig::default();
        if let Some(threshold) = var("REWIND_COMPRESSION_THRESHOLD") {
            cache.compression_threshold = parse_threshold(&threshold)?;
        }

        Ok(Self { cache_path, cache })
    }
}

fn parse_threshold(value: &str) -> eyre::Result<Option<usize>> {
    if value.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let threshold = value.parse().wrap_err_with(|| {
        format!("REWIND_COMPRESSION_THRESHOLD must be a size or `off`, got {value:?}")
    })?;
    Ok(Some(threshold))
}

enum Cache {
    Memory(MemoryCache),
    File(FileCache),
}

impl Cache {
    fn open(config: &Config) -> eyre::Result<Self> {
        match &config.cache_path {
            Some(path) => {
                let cache = FileCache::create(path, config.cache)
                    .wrap_err_with(|| format!("creating index file {}", path.display()))?;
                Ok(Self::File(cache))
            }
            None => Ok(Self::Memory(MemoryCache::with_config(config.cache))),
        }
    }

    fn writer(&mut self) -> &mut dyn WriteCache {
        match self {
            Self::Memory(cache) => cache,
            Self::File(cache) => cache,
        }
    }

    fn reader(&self) -> &dyn ReadCache {
        match self {
            Self::Memory(cache) => cache,
            Self::File(cache) => cache,
        }
    }

    fn len(&self) -> u64 {
        match self {
            Self::Memory(cache) => cache.len(),
            Self::File(cache) => cache.len(),
        }
    }
}

/// Applies packets to the mirror and counts them.
struct Counting<'a> {
    mirror: &'a mut ClientMirror,
    count: usize,
}

impl PacketSink for Counting<'_> {
    fn accept(&mut self, packet: Packet) {
        trace!(packet = packet.name(), "emitted");
        self.mirror.apply(&packet);
        self.count += 1;
    }
}

fn load_recording(path: &Path) -> eyre::Result<Recording> {
    let file = File::open(path).wrap_err_with(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .wrap_err_with(|| format!("parsing recording {}", path.display()))
}

fn describe(
    out: &mut impl Write,
    time: Time,
    emitted: usize,
    mirror: &ClientMirror,
) -> io::Result<()> {
    let dimension = mirror
        .dimension
        .as_ref()
        .map_or("-", |respawn| respawn.dimension.as_str());
    writeln!(out, "t={time}ms emitted={emitted} dimension={dimension}")?;
    writeln!(
        out,
        "  entities={} chunks={} tags={}",
        mirror.entities.len(),
        mirror.chunks.len(),
        mirror.tags.len()
    )?;
    writeln!(
        out,
        "  raining={} rain={:.2} thunder={:.2} time_of_day={}",
        mirror.raining, mirror.rain_level, mirror.thunder_level, mirror.clock.time_of_day
    )?;
    writeln!(
        out,
        "  view_center=({}, {}) view_distance={}",
        mirror.view_center.0, mirror.view_center.1, mirror.view_distance
    )
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rewind=info".parse()?)
                .add_directive("rewind_index=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(recording_path) = args.next().map(PathBuf::from) else {
        bail!("usage: rewind <recording.json> <time-ms>...");
    };
    let targets = args
        .map(|arg| {
            arg.parse::<Time>()
                .wrap_err_with(|| format!("seek target {arg:?} is not a time in milliseconds"))
        })
        .collect::<eyre::Result<Vec<_>>>()?;

    let config = Config::from_env()?;
    let recording = load_recording(&recording_path)?;
    info!(
        packets = recording.packets.len(),
        path = %recording_path.display(),
        "loaded recording"
    );

    let mut cache = Cache::open(&config)?;
    let mut analyzer = Analyzer::new(cache.writer());
    for RecordedPacket { time, packet } in &recording.packets {
        analyzer.push(*time, packet)?;
    }
    let root = analyzer.finish()?;
    info!(root, bytes = cache.len(), "index built");

    let mut seeker = Seeker::open(cache.reader(), root)?;
    let mut mirror = ClientMirror::new();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for to in targets {
        let mut sink = Counting {
            mirror: &mut mirror,
            count: 0,
        };
        seeker.seek(cache.reader(), &mut sink, to)?;
        let emitted = sink.count;
        describe(&mut out, to, emitted, &mirror)?;
    }
    Ok(())
}
