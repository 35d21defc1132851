//! Synthetic Sequencing Device
//!
//! Feeds a [`SimulatedDevice`] with plausible live-reads traffic: every poll
//! interval each active channel delivers one chunk of its current read,
//! reads end after a random number of chunks, and actions received from the
//! client are honoured (stop ends delivery for the read, unblock ejects it)
//! and acknowledged in the next response.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use read_until_core::{
    ActionKind, ActionOutcome, LiveReadsResponse, PendingAction, RawDataType, ReadChunk,
    SimulatedDevice,
};

/// Classification weights for generated chunks: (code, relative weight)
const CLASS_WEIGHTS: [(i32, u32); 5] = [(83, 60), (65, 15), (80, 15), (84, 5), (78, 5)];

/// Shape of the generated traffic
#[derive(Clone, Debug)]
pub struct GeneratorSettings {
    /// Lowest channel producing reads
    pub first_channel: u32,
    /// Highest channel producing reads
    pub last_channel: u32,
    /// Time between responses
    pub poll_interval: Duration,
    /// Samples per chunk
    pub chunk_samples: u64,
    /// Longest read, in chunks
    pub max_read_chunks: u32,
    /// Encoding of generated payloads
    pub raw_data_type: RawDataType,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            first_channel: 1,
            last_channel: 512,
            poll_interval: Duration::from_millis(400),
            chunk_samples: 1_600,
            max_read_chunks: 20,
            raw_data_type: RawDataType::Calibrated,
        }
    }
}

/// One channel's current read
#[derive(Clone, Debug)]
struct ChannelRead {
    read_number: u32,
    read_id: String,
    chunks_left: u32,
    start_offset: u64,
    median_before: f32,
    stopped: bool,
}

/// Traffic generator state
#[derive(Debug)]
pub struct ReadGenerator {
    settings: GeneratorSettings,
    rng: StdRng,
    reads: BTreeMap<u32, ChannelRead>,
    samples: u64,
}

impl ReadGenerator {
    /// Create a generator with its own random source
    pub fn new(settings: GeneratorSettings, rng: StdRng) -> Self {
        Self {
            settings,
            rng,
            reads: BTreeMap::new(),
            samples: 0,
        }
    }

    /// Samples acquired so far on each channel
    pub fn samples(&self) -> u64 {
        self.samples
    }

    fn new_read(&mut self, read_number: u32) -> ChannelRead {
        ChannelRead {
            read_number,
            read_id: Uuid::new_v4().to_string(),
            chunks_left: self.rng.gen_range(1..=self.settings.max_read_chunks.max(1)),
            start_offset: self.samples,
            median_before: self.rng.gen_range(180.0..260.0),
            stopped: false,
        }
    }

    fn classification(&mut self) -> i32 {
        let total: u32 = CLASS_WEIGHTS.iter().map(|(_, weight)| weight).sum();
        let mut pick = self.rng.gen_range(0..total);
        for (code, weight) in CLASS_WEIGHTS {
            if pick < weight {
                return code;
            }
            pick -= weight;
        }
        CLASS_WEIGHTS[0].0
    }

    #[allow(clippy::cast_possible_truncation)]
    fn payload(&mut self, median: f32) -> Vec<u8> {
        let samples = self.settings.chunk_samples as usize;
        match self.settings.raw_data_type {
            RawDataType::Calibrated => (0..samples)
                .flat_map(|_| (median + self.rng.gen_range(-15.0f32..15.0)).to_le_bytes())
                .collect(),
            RawDataType::Uncalibrated => (0..samples)
                .flat_map(|_| {
                    let adc = (median * 4.0) as i16 + self.rng.gen_range(-60i16..60);
                    adc.to_le_bytes()
                })
                .collect(),
        }
    }

    /// Apply actions and build the acknowledgements for them
    pub fn apply_actions(&mut self, actions: Vec<PendingAction>) -> LiveReadsResponse {
        let mut response = LiveReadsResponse::new();
        for action in actions {
            let current = self
                .reads
                .get(&action.channel_id)
                .is_some_and(|read| read.read_number == action.read_number);
            let outcome = if current {
                ActionOutcome::Success
            } else {
                ActionOutcome::FailedReadFinished
            };
            if current {
                match action.kind {
                    ActionKind::StopFurtherData => {
                        if let Some(read) = self.reads.get_mut(&action.channel_id) {
                            read.stopped = true;
                        }
                    }
                    ActionKind::Unblock => {
                        if let Some(read) = self.reads.get_mut(&action.channel_id) {
                            read.chunks_left = 0;
                        }
                    }
                }
            }
            debug!(
                channel = action.channel_id,
                read_number = action.read_number,
                action = %action.kind,
                ?outcome,
                "Device applied action"
            );
            response = response.with_action_response(action.action_id, outcome);
        }
        response
    }

    /// Advance one poll interval, adding a chunk for every delivering channel
    pub fn tick(&mut self, mut response: LiveReadsResponse) -> LiveReadsResponse {
        for channel in self.settings.first_channel..=self.settings.last_channel {
            let read = match self.reads.get(&channel) {
                Some(read) if read.chunks_left > 0 => read.clone(),
                Some(read) => {
                    let next = read.read_number + 1;
                    self.new_read(next)
                }
                None => {
                    let first = self.rng.gen_range(1..100);
                    self.new_read(first)
                }
            };

            let mut read = read;
            read.chunks_left -= 1;
            if !read.stopped {
                let median = read.median_before - self.rng.gen_range(0.0..120.0);
                let classification = self.classification();
                let payload = self.payload(median);
                response = response.with_chunk(
                    ReadChunk::new(channel, read.read_number, read.read_id.clone())
                        .with_payload(payload)
                        .with_classifications(vec![classification])
                        .with_samples(read.start_offset, self.settings.chunk_samples)
                        .with_medians(read.median_before, median),
                );
            }
            self.reads.insert(channel, read);
        }
        self.samples += self.settings.chunk_samples;
        response
    }
}

/// Drive `device` until `shutdown` flips to true
pub async fn run(
    device: SimulatedDevice,
    mut generator: ReadGenerator,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(generator.settings.poll_interval);
    info!(
        first_channel = generator.settings.first_channel,
        last_channel = generator.settings.last_channel,
        "Simulated device started"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let acknowledgements = generator.apply_actions(device.take_actions());
                let response = generator.tick(acknowledgements);
                device.advance_progress(generator.settings.chunk_samples);
                if device.streams_active() > 0 {
                    device.push_response(response);
                }
            }
        }
    }

    info!(samples = generator.samples(), "Simulated device stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;

    fn generator(first: u32, last: u32) -> ReadGenerator {
        ReadGenerator::new(
            GeneratorSettings {
                first_channel: first,
                last_channel: last,
                chunk_samples: 10,
                max_read_chunks: 3,
                ..GeneratorSettings::default()
            },
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_tick_covers_every_channel() {
        let mut generator = generator(1, 4);
        let response = generator.tick(LiveReadsResponse::new());
        assert_eq!(response.channels.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        let chunk = &response.channels[&2];
        assert_eq!(chunk.raw_payload.len(), 40);
        assert_eq!(chunk.chunk_length, 10);
        assert!(chunk.median_before >= chunk.median);
        assert_eq!(generator.samples(), 10);
    }

    #[test]
    fn test_stop_silences_read_until_it_ends() {
        let mut generator = generator(1, 1);
        let first = generator.tick(LiveReadsResponse::new());
        let chunk = &first.channels[&1];
        let read_number = chunk.read_number;

        let acks = generator.apply_actions(vec![PendingAction::stop_further_data(1, read_number)]);
        assert_eq!(acks.action_responses[0].outcome, ActionOutcome::Success);

        for _ in 0..10 {
            let response = generator.tick(LiveReadsResponse::new());
            if let Some(chunk) = response.channels.get(&1) {
                assert_ne!(chunk.read_number, read_number);
                return;
            }
        }
        panic!("a new read should start after the stopped one ends");
    }

    #[test]
    fn test_action_on_finished_read_fails() {
        let mut generator = generator(1, 1);
        let response = generator.tick(LiveReadsResponse::new());
        let stale = response.channels[&1].read_number + 50;
        let acks = generator.apply_actions(vec![PendingAction::unblock(
            1,
            stale,
            Duration::from_millis(100),
        )]);
        assert_eq!(
            acks.action_responses[0].outcome,
            ActionOutcome::FailedReadFinished
        );
    }

    #[test]
    fn test_uncalibrated_payload_width() {
        let mut generator = ReadGenerator::new(
            GeneratorSettings {
                first_channel: 1,
                last_channel: 1,
                chunk_samples: 8,
                raw_data_type: RawDataType::Uncalibrated,
                ..GeneratorSettings::default()
            },
            StdRng::seed_from_u64(1),
        );
        let response = generator.tick(LiveReadsResponse::new());
        assert_eq!(response.channels[&1].raw_payload.len(), 16);
    }
}
