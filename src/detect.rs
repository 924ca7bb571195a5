//! Detector framework: the shared on/off state machine with debouncing,
//! refractory periods and cross-detector inhibition, driven once per block
//! with the spectrum the pipeline produced.

use std::ops::Range;

use crate::audio::{ BLOCK_LEN, SAMPLE_RATE };
use crate::channel::ActionChannel;

/// Minimum blocks between two transitions of the same detector.
pub const INTER_TRANSITION_BLOCKS: u32 = 3;

/// Bin carrying the lowest useful band (bin 0 is DC).
pub const LOW_BIN: usize = 1;
/// Mid band used as a rejection feature by the hum detector.
pub const MID_BAND: Range<usize> = 32..64;
/// High band ("O7"), the workhorse feature for blows, cats and sips.
pub const HIGH_BAND: Range<usize> = 64..128;

#[inline]
pub fn band_sum(spectrum: &[f32], band: Range<usize>) -> f32 {
    let end = band.end.min(spectrum.len());
    if band.start >= end {
        return 0.0;
    }
    spectrum[band.start..end].iter().sum()
}

#[inline]
pub fn hz_to_bin(hz: f32) -> usize {
    (((hz * (BLOCK_LEN as f32)) / (SAMPLE_RATE as f32)).round() as usize).min(BLOCK_LEN / 2)
}

/// `new = alpha * sample + (1 - alpha) * old`
#[inline]
pub fn ewma(alpha: f32, sample: f32, old: f32) -> f32 {
    alpha * sample + (1.0 - alpha) * old
}

/// Everything a detector may ask the dispatcher to do. `RecordFrame` and
/// `TrainingSilence` only occur in training sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LeftDown,
    LeftUp,
    RightDown,
    RightUp,
    ScrollUp,
    ScrollDown,
    NoAction,
    RecordFrame,
    TrainingSilence,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::LeftDown => "left-down",
            Action::LeftUp => "left-up",
            Action::RightDown => "right-down",
            Action::RightUp => "right-up",
            Action::ScrollUp => "scroll-up",
            Action::ScrollDown => "scroll-down",
            Action::NoAction => "no-action",
            Action::RecordFrame => "record-frame",
            Action::TrainingSilence => "training-silence",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        match s.trim() {
            "left-down" => Some(Action::LeftDown),
            "left-up" => Some(Action::LeftUp),
            "right-down" => Some(Action::RightDown),
            "right-up" => Some(Action::RightUp),
            "scroll-up" => Some(Action::ScrollUp),
            "scroll-down" => Some(Action::ScrollDown),
            "no-action" => Some(Action::NoAction),
            "record-frame" => Some(Action::RecordFrame),
            "training-silence" => Some(Action::TrainingSilence),
            _ => None,
        }
    }
}

/// Contract every sound variant implements; the bank drives the state
/// machine, variants only extract features and answer threshold questions.
pub trait SoundDetector: Send {
    fn name(&self) -> &'static str;
    fn update_state(&mut self, spectrum: &[f32]);
    fn should_transition_on(&self) -> bool;
    fn should_transition_off(&self) -> bool;
    fn refractory_blocks(&self) -> u32;
    fn reset_averages(&mut self);
    /// Whether the refractory counter may tick down this block. The tongue
    /// variant gates this on its low threshold; everyone else always ticks.
    fn refractory_may_tick(&self) -> bool {
        true
    }
}

/// Where emitted actions go: the dispatcher queue in normal operation, a
/// frame-index list during training passes.
pub enum EmitSink<'a> {
    Live(&'a ActionChannel),
    Training(&'a mut Vec<u64>),
}

/// One detector plus the bookkeeping the framework owns for it.
pub struct DetectorSlot {
    pub detector: Box<dyn SoundDetector>,
    pub on_action: Action,
    pub off_action: Action,
    pub enabled: bool,
    /// Bank indices this detector suppresses while it is on.
    pub inhibits: Vec<usize>,
    on: bool,
    refractory_left: u32,
    blocks_since_transition: u32,
    frame: u64,
}

impl DetectorSlot {
    pub fn new(detector: Box<dyn SoundDetector>, on_action: Action, off_action: Action) -> Self {
        Self {
            detector,
            on_action,
            off_action,
            enabled: true,
            inhibits: Vec::new(),
            on: false,
            // no transition has happened yet, so the debounce must not
            // delay the very first one
            blocks_since_transition: INTER_TRANSITION_BLOCKS,
            refractory_left: 0,
            frame: 0,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn refractory_left(&self) -> u32 {
        self.refractory_left
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// Owns every active detector; inhibition targets are expressed as indices
/// into this collection so detectors can be rebuilt without dangling
/// references.
#[derive(Default)]
pub struct DetectorBank {
    slots: Vec<DetectorSlot>,
}

impl DetectorBank {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn push(&mut self, slot: DetectorSlot) -> usize {
        self.slots.push(slot);
        self.slots.len() - 1
    }

    pub fn add_inhibition(&mut self, from: usize, to: usize) {
        if from != to && to < self.slots.len() {
            self.slots[from].inhibits.push(to);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, idx: usize) -> &DetectorSlot {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut DetectorSlot {
        &mut self.slots[idx]
    }

    /// Drive every slot with one spectrum, in bank order. Each slot is
    /// processed to completion (including inhibition it causes) before the
    /// next slot runs.
    pub fn process_block(&mut self, spectrum: &[f32], sink: &mut EmitSink<'_>) {
        for i in 0..self.slots.len() {
            let mut emitted: Option<(Action, bool)> = None;

            {
                let slot = &mut self.slots[i];
                slot.frame += 1;
                slot.blocks_since_transition = slot.blocks_since_transition.saturating_add(1);
                slot.detector.update_state(spectrum);

                if !slot.enabled {
                    continue;
                }

                if slot.on {
                    if
                        slot.detector.should_transition_off() &&
                        slot.blocks_since_transition >= INTER_TRANSITION_BLOCKS
                    {
                        slot.on = false;
                        slot.blocks_since_transition = 0;
                        slot.detector.reset_averages();
                        emitted = Some((slot.off_action, false));
                    }
                }
                if !slot.on {
                    if slot.refractory_left > 0 && slot.detector.refractory_may_tick() {
                        slot.refractory_left -= 1;
                    }
                    if
                        slot.refractory_left == 0 &&
                        slot.detector.should_transition_on() &&
                        slot.blocks_since_transition >= INTER_TRANSITION_BLOCKS
                    {
                        slot.on = true;
                        slot.blocks_since_transition = 0;
                        emitted = Some((slot.on_action, true));
                    }
                }
            }

            if let Some((action, is_on)) = emitted {
                match sink {
                    EmitSink::Live(chan) => {
                        if action != Action::NoAction {
                            chan.enqueue(action);
                        }
                    }
                    EmitSink::Training(frames) => {
                        if is_on {
                            frames.push(self.slots[i].frame);
                        }
                    }
                }
            }

            // While on, keep the own refractory armed and hold every
            // inhibition target down: their counters never reach zero for
            // as long as this detector stays active.
            if self.slots[i].on {
                self.slots[i].refractory_left = self.slots[i].detector.refractory_blocks();
                let targets = self.slots[i].inhibits.clone();
                for t in targets {
                    if t == i || t >= self.slots.len() {
                        continue;
                    }
                    let target = &mut self.slots[t];
                    target.refractory_left = target.detector.refractory_blocks();
                    target.detector.reset_averages();
                }
            }
        }
    }
}

/// Replay precomputed spectra through one detector in training mode and
/// return the frame indices of its on-transitions.
pub fn replay_training(detector: Box<dyn SoundDetector>, spectra: &[Vec<f32>]) -> Vec<u64> {
    let mut bank = DetectorBank::new();
    bank.push(DetectorSlot::new(detector, Action::RecordFrame, Action::NoAction));
    let mut frames = Vec::new();
    {
        let mut sink = EmitSink::Training(&mut frames);
        for spectrum in spectra {
            bank.process_block(spectrum, &mut sink);
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SPECTRUM_LEN;

    /// Minimal variant for framework tests: on while bin 1 is above the on
    /// threshold, off below the off threshold.
    struct Stub {
        on_thr: f32,
        off_thr: f32,
        level: f32,
        refractory: u32,
    }

    impl Stub {
        fn boxed(on_thr: f32, off_thr: f32, refractory: u32) -> Box<dyn SoundDetector> {
            Box::new(Stub { on_thr, off_thr, level: 0.0, refractory })
        }
    }

    impl SoundDetector for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn update_state(&mut self, spectrum: &[f32]) {
            self.level = spectrum[LOW_BIN];
        }
        fn should_transition_on(&self) -> bool {
            self.level > self.on_thr
        }
        fn should_transition_off(&self) -> bool {
            self.level < self.off_thr
        }
        fn refractory_blocks(&self) -> u32 {
            self.refractory
        }
        fn reset_averages(&mut self) {
            self.level = 0.0;
        }
    }

    fn spectrum(bin1: f32) -> Vec<f32> {
        let mut s = vec![0.0f32; SPECTRUM_LEN];
        s[LOW_BIN] = bin1;
        s
    }

    fn run(bank: &mut DetectorBank, levels: &[f32]) -> Vec<u64> {
        let mut frames = Vec::new();
        let mut sink = EmitSink::Training(&mut frames);
        for &l in levels {
            bank.process_block(&spectrum(l), &mut sink);
        }
        frames
    }

    #[test]
    fn debounce_holds_transitions_apart() {
        let mut bank = DetectorBank::new();
        bank.push(DetectorSlot::new(Stub::boxed(10.0, 5.0, 0), Action::LeftDown, Action::LeftUp));

        // level oscillates hard every block; transitions may never be
        // closer than INTER_TRANSITION_BLOCKS
        let levels: Vec<f32> = (0..40)
            .map(|i| if i % 2 == 0 { 20.0 } else { 0.0 })
            .collect();

        let mut transitions: Vec<u64> = Vec::new();
        let mut sink_frames = Vec::new();
        {
            let mut sink = EmitSink::Training(&mut sink_frames);
            let mut was_on = false;
            for (i, &l) in levels.iter().enumerate() {
                bank.process_block(&spectrum(l), &mut sink);
                let now_on = bank.slot(0).is_on();
                if now_on != was_on {
                    transitions.push(i as u64 + 1);
                    was_on = now_on;
                }
            }
        }

        assert!(!transitions.is_empty());
        for pair in transitions.windows(2) {
            assert!(
                pair[1] - pair[0] >= INTER_TRANSITION_BLOCKS as u64,
                "transitions at {:?} violate the debounce",
                pair
            );
        }
    }

    #[test]
    fn refractory_delays_reactivation() {
        let mut bank = DetectorBank::new();
        bank.push(DetectorSlot::new(Stub::boxed(10.0, 5.0, 8), Action::LeftDown, Action::LeftUp));

        // on at block 1, off at block 4 (first allowed), then hot again
        let mut levels = vec![20.0, 0.0, 0.0, 0.0];
        levels.extend(std::iter::repeat(20.0).take(20));
        let frames = run(&mut bank, &levels);

        assert_eq!(frames[0], 1);
        // the off block itself ticks the armed refractory (8→7), then one
        // tick per block; the counter reaches zero at block 11 and the
        // detector re-arms there
        assert_eq!(frames[1], 11);
    }

    #[test]
    fn inhibited_target_cannot_activate_while_inhibitor_is_on() {
        let mut bank = DetectorBank::new();
        let blow = bank.push(
            DetectorSlot::new(Stub::boxed(10.0, 5.0, 4), Action::LeftDown, Action::LeftUp)
        );
        let cat = bank.push(
            DetectorSlot::new(Stub::boxed(1.0, 0.5, 4), Action::RightDown, Action::RightUp)
        );
        bank.add_inhibition(blow, cat);

        // bin 1 hot enough for both the whole time
        let mut sink_frames = Vec::new();
        let mut sink = EmitSink::Training(&mut sink_frames);
        for _ in 0..30 {
            bank.process_block(&spectrum(20.0), &mut sink);
            if bank.slot(blow).is_on() {
                assert!(
                    bank.slot(cat).refractory_left() > 0,
                    "inhibited target refractory hit zero while inhibitor on"
                );
                assert!(!bank.slot(cat).is_on());
            }
        }
        assert!(bank.slot(blow).is_on());
    }

    #[test]
    fn disabled_slot_never_transitions() {
        let mut bank = DetectorBank::new();
        let idx = bank.push(
            DetectorSlot::new(Stub::boxed(10.0, 5.0, 0), Action::LeftDown, Action::LeftUp)
        );
        bank.slot_mut(idx).enabled = false;

        let frames = run(&mut bank, &vec![20.0; 10]);
        assert!(frames.is_empty());
        assert!(!bank.slot(idx).is_on());
    }

    #[test]
    fn training_sink_records_on_transitions_only() {
        let mut bank = DetectorBank::new();
        bank.push(DetectorSlot::new(Stub::boxed(10.0, 5.0, 0), Action::LeftDown, Action::LeftUp));

        // one clean on-off cycle
        let levels = [20.0, 20.0, 20.0, 0.0, 0.0, 0.0, 0.0];
        let frames = run(&mut bank, &levels);
        assert_eq!(frames, vec![1]);
        assert!(!bank.slot(0).is_on());
    }

    #[test]
    fn replay_is_deterministic() {
        let spectra: Vec<Vec<f32>> = (0..60)
            .map(|i| spectrum(if (i / 7) % 2 == 0 { 20.0 } else { 0.0 }))
            .collect();

        let a = replay_training(Stub::boxed(10.0, 5.0, 4), &spectra);
        let b = replay_training(Stub::boxed(10.0, 5.0, 4), &spectra);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn hz_to_bin_maps_band_edges() {
        // bin width is 44100/256 ≈ 172.3 Hz
        assert_eq!(hz_to_bin(0.0), 0);
        assert_eq!(hz_to_bin(172.3), 1);
        assert_eq!(hz_to_bin(11_025.0), 64);
        assert_eq!(hz_to_bin(30_000.0), 128);
    }

    #[test]
    fn band_sum_clamps_to_spectrum_len() {
        let s = vec![1.0f32; 100];
        assert_eq!(band_sum(&s, 90..200), 10.0);
        assert_eq!(band_sum(&s, 120..130), 0.0);
    }
}
