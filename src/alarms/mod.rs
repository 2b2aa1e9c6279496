//! Alarm Engine - five independent edge-triggered alarms
//!
//! | Alarm     | Active when                                                      |
//! |-----------|------------------------------------------------------------------|
//! | Defects   | window lumps > max_lumps AND window necks > max_necks            |
//! | Diameter  | any of D1..D4 outside [centre - lower_tol, centre + upper_tol]   |
//! | Pulsation | the spectrum shows at least one peak above the threshold         |
//! | Ovality   | (dMax - dMin) / dAvg * 100 < max_ovality                         |
//! | StdDev    | any channel's trailing standard deviation > max_std_dev          |
//!
//! An alarm whose input is unavailable in a cycle keeps its previous state.
//! Only state flips produce events; every event goes to the [`EventSink`].
//! The common-fault lamp follows the configured [`LampPolicy`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::storage::EventSink;
use crate::types::{
    AlarmEvent, AlarmKind, AlarmState, AlarmTransition, LampPolicy, Sample, DIAMETER_CHANNELS,
};

/// Everything one evaluation looks at.
#[derive(Debug, Clone, Copy)]
pub struct AlarmInputs<'a> {
    /// Routed sample: diameters, distance, labels and limits
    pub sample: &'a Sample,
    pub window_lumps: u64,
    pub window_necks: u64,
    /// Peaks above the pulsation threshold, `None` until a spectrum exists
    pub pulsation_peaks: Option<usize>,
    /// Per-channel trailing std-dev, `None` until the window is full
    pub std_devs: Option<[f64; DIAMETER_CHANNELS]>,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Alarms that flipped, in evaluation order
    pub transitions: Vec<(AlarmKind, AlarmTransition)>,
    /// New lamp value when the lamp has to be switched
    pub lamp: Option<bool>,
}

impl Evaluation {
    pub fn is_quiet(&self) -> bool {
        self.transitions.is_empty() && self.lamp.is_none()
    }
}

/// Serializable view of the alarm states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlarmStates {
    pub defects: AlarmState,
    pub diameter: AlarmState,
    pub pulsation: AlarmState,
    pub ovality: AlarmState,
    pub std_dev: AlarmState,
    /// Common-fault lamp as last commanded
    pub lamp: bool,
}

impl AlarmStates {
    pub fn any_active(&self) -> bool {
        [
            self.defects,
            self.diameter,
            self.pulsation,
            self.ovality,
            self.std_dev,
        ]
        .iter()
        .any(|s| s.is_active())
    }
}

/// Per-alarm state machine plus event and lamp side effects.
pub struct AlarmEngine {
    defects: AlarmState,
    diameter: AlarmState,
    pulsation: AlarmState,
    ovality: AlarmState,
    std_dev: AlarmState,
    lamp: bool,
    lamp_policy: LampPolicy,
    sink: Arc<dyn EventSink>,
    events_saved: u64,
    events_failed: u64,
}

impl AlarmEngine {
    pub fn new(sink: Arc<dyn EventSink>, lamp_policy: LampPolicy) -> Self {
        Self {
            defects: AlarmState::Inactive,
            diameter: AlarmState::Inactive,
            pulsation: AlarmState::Inactive,
            ovality: AlarmState::Inactive,
            std_dev: AlarmState::Inactive,
            lamp: false,
            lamp_policy,
            sink,
            events_saved: 0,
            events_failed: 0,
        }
    }

    pub fn set_lamp_policy(&mut self, policy: LampPolicy) {
        if policy != self.lamp_policy {
            info!(?policy, "Lamp policy changed");
            self.lamp_policy = policy;
        }
    }

    pub const fn state(&self, kind: AlarmKind) -> AlarmState {
        match kind {
            AlarmKind::Defects => self.defects,
            AlarmKind::Diameter => self.diameter,
            AlarmKind::Pulsation => self.pulsation,
            AlarmKind::Ovality => self.ovality,
            AlarmKind::StdDev => self.std_dev,
        }
    }

    fn state_mut(&mut self, kind: AlarmKind) -> &mut AlarmState {
        match kind {
            AlarmKind::Defects => &mut self.defects,
            AlarmKind::Diameter => &mut self.diameter,
            AlarmKind::Pulsation => &mut self.pulsation,
            AlarmKind::Ovality => &mut self.ovality,
            AlarmKind::StdDev => &mut self.std_dev,
        }
    }

    pub const fn states(&self) -> AlarmStates {
        AlarmStates {
            defects: self.defects,
            diameter: self.diameter,
            pulsation: self.pulsation,
            ovality: self.ovality,
            std_dev: self.std_dev,
            lamp: self.lamp,
        }
    }

    pub const fn lamp(&self) -> bool {
        self.lamp
    }

    /// (saved, failed) sink writes
    pub const fn event_counts(&self) -> (u64, u64) {
        (self.events_saved, self.events_failed)
    }

    /// Evaluate all five alarms against one cycle's inputs.
    pub fn evaluate(&mut self, inputs: &AlarmInputs<'_>) -> Evaluation {
        let mut evaluation = Evaluation::default();
        let mut last_edge: Option<bool> = None;

        for kind in AlarmKind::ALL {
            let Some((active, detail)) = condition(kind, inputs) else {
                continue;
            };
            let previous = self.state(kind);
            let next = AlarmState::from_active(active);
            let transition = AlarmTransition::between(previous, next);
            if !transition.is_edge() {
                continue;
            }

            *self.state_mut(kind) = next;
            info!(alarm = %kind, ?transition, distance = inputs.sample.distance, %detail, "Alarm state changed");
            self.record(kind, transition, detail, inputs);
            evaluation.transitions.push((kind, transition));
            last_edge = Some(active);
        }

        let wanted = match self.lamp_policy {
            LampPolicy::LastTransition => last_edge,
            LampPolicy::Aggregate => Some(self.states().any_active()),
        };
        if let Some(lamp) = wanted {
            if lamp != self.lamp {
                self.lamp = lamp;
                evaluation.lamp = Some(lamp);
            }
        }

        evaluation
    }

    fn record(
        &mut self,
        kind: AlarmKind,
        transition: AlarmTransition,
        detail: String,
        inputs: &AlarmInputs<'_>,
    ) {
        let sample = inputs.sample;
        let event = AlarmEvent {
            settings_id: sample.limits.settings_id,
            timestamp: sample.timestamp,
            distance: sample.distance,
            product: sample.product.clone(),
            batch: sample.batch.clone(),
            kind,
            diameters: sample.diameters,
            lumps: inputs.window_lumps,
            necks: inputs.window_necks,
            transition,
            comment: format!("{}: {}", kind.label(), detail),
        };

        if self.sink.save_event(&event) {
            self.events_saved += 1;
        } else {
            self.events_failed += 1;
            warn!(
                alarm = %kind,
                backend = self.sink.backend_name(),
                failed = self.events_failed,
                "Alarm event not stored"
            );
        }
    }
}

/// Active flag and a short description, or `None` when the input is
/// unavailable this cycle.
fn condition(kind: AlarmKind, inputs: &AlarmInputs<'_>) -> Option<(bool, String)> {
    let sample = inputs.sample;
    let limits = &sample.limits;
    match kind {
        AlarmKind::Defects => {
            let active = inputs.window_lumps > u64::from(limits.max_lumps)
                && inputs.window_necks > u64::from(limits.max_necks);
            Some((
                active,
                format!(
                    "lumps {}/{}, necks {}/{}",
                    inputs.window_lumps, limits.max_lumps, inputs.window_necks, limits.max_necks
                ),
            ))
        }
        AlarmKind::Diameter => {
            if !sample.has_valid_diameters() {
                return None;
            }
            let centre = if limits.preset_diameter > 0.0 {
                limits.preset_diameter
            } else {
                sample.average_diameter()
            };
            let low = centre - limits.lower_tolerance;
            let high = centre + limits.upper_tolerance;
            let outside: Vec<String> = sample
                .diameters
                .iter()
                .enumerate()
                .filter(|(_, d)| **d < low || **d > high)
                .map(|(i, d)| format!("D{}={:.3}", i + 1, d))
                .collect();
            let detail = if outside.is_empty() {
                format!("all channels within [{low:.3}, {high:.3}]")
            } else {
                format!("{} outside [{low:.3}, {high:.3}]", outside.join(" "))
            };
            Some((!outside.is_empty(), detail))
        }
        AlarmKind::Pulsation => inputs
            .pulsation_peaks
            .map(|peaks| (peaks > 0, format!("{peaks} peak(s) above {:.3} mm", limits.pulsation_threshold))),
        AlarmKind::Ovality => sample.ovality_percent().map(|ovality| {
            (
                ovality < limits.max_ovality,
                format!("ovality {ovality:.2}% (limit {:.2}%)", limits.max_ovality),
            )
        }),
        AlarmKind::StdDev => inputs.std_devs.map(|sd| {
            let worst = sd.iter().copied().fold(0.0, f64::max);
            (
                sd.iter().any(|&s| s > limits.max_std_dev),
                format!("max std-dev {worst:.4} mm (limit {:.4})", limits.max_std_dev),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryEventSink, OfflineSink};
    use crate::types::{Recipe, SampleLimits};
    use chrono::Utc;

    fn sample(diameters: [f64; 4]) -> Sample {
        let recipe = Recipe {
            preset_diameter: 18.0,
            upper_tolerance: 0.5,
            lower_tolerance: 0.5,
            // keep ovality inactive for round stock unless a test says otherwise
            max_ovality: 0.0,
            ..Recipe::default()
        };
        let mut s = Sample::new(Utc::now(), diameters);
        s.limits = SampleLimits::from(&recipe);
        s
    }

    fn inputs(s: &Sample) -> AlarmInputs<'_> {
        AlarmInputs {
            sample: s,
            window_lumps: 0,
            window_necks: 0,
            pulsation_peaks: None,
            std_devs: None,
        }
    }

    fn engine(policy: LampPolicy) -> (AlarmEngine, Arc<MemoryEventSink>) {
        let sink = Arc::new(MemoryEventSink::new());
        (AlarmEngine::new(sink.clone(), policy), sink)
    }

    #[test]
    fn diameter_out_of_tolerance_enters_once() {
        let (mut engine, sink) = engine(LampPolicy::LastTransition);

        let nominal = sample([18.0; 4]);
        assert!(engine.evaluate(&inputs(&nominal)).is_quiet());
        assert_eq!(engine.state(AlarmKind::Diameter), AlarmState::Inactive);

        let fat = sample([18.0, 18.0, 18.6, 18.0]);
        let eval = engine.evaluate(&inputs(&fat));
        assert_eq!(eval.transitions, vec![(AlarmKind::Diameter, AlarmTransition::Entered)]);
        assert_eq!(eval.lamp, Some(true));
        assert_eq!(sink.len(), 1);

        let event = &sink.events()[0];
        assert_eq!(event.kind, AlarmKind::Diameter);
        assert_eq!(event.transition, AlarmTransition::Entered);
        assert!(event.comment.contains("D3=18.600"));
    }

    #[test]
    fn repeated_inputs_produce_no_change() {
        let (mut engine, sink) = engine(LampPolicy::LastTransition);
        let fat = sample([18.7; 4]);

        engine.evaluate(&inputs(&fat));
        for _ in 0..100 {
            let eval = engine.evaluate(&inputs(&fat));
            assert!(eval.is_quiet());
        }
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn exit_is_recorded() {
        let (mut engine, sink) = engine(LampPolicy::LastTransition);
        engine.evaluate(&inputs(&sample([17.4; 4])));
        let eval = engine.evaluate(&inputs(&sample([18.0; 4])));

        assert_eq!(eval.transitions, vec![(AlarmKind::Diameter, AlarmTransition::Exited)]);
        assert_eq!(eval.lamp, Some(false));
        assert_eq!(sink.events()[1].transition, AlarmTransition::Exited);
    }

    #[test]
    fn defects_need_both_counts_over_limit() {
        let (mut engine, _) = engine(LampPolicy::LastTransition);
        let s = sample([18.0; 4]);
        let mut i = inputs(&s);

        i.window_lumps = 10;
        i.window_necks = 3;
        engine.evaluate(&i);
        assert_eq!(engine.state(AlarmKind::Defects), AlarmState::Inactive);

        i.window_necks = 4;
        engine.evaluate(&i);
        assert_eq!(engine.state(AlarmKind::Defects), AlarmState::Active);
    }

    #[test]
    fn unavailable_inputs_keep_previous_state() {
        let (mut engine, _) = engine(LampPolicy::LastTransition);
        let s = sample([18.0; 4]);
        let mut i = inputs(&s);
        i.pulsation_peaks = Some(2);
        i.std_devs = Some([0.5, 0.0, 0.0, 0.0]);
        engine.evaluate(&i);
        assert!(engine.state(AlarmKind::Pulsation).is_active());
        assert!(engine.state(AlarmKind::StdDev).is_active());

        let blind = sample([18.0, 0.0, 18.0, 18.0]);
        let eval = engine.evaluate(&inputs(&blind));
        assert!(eval.transitions.is_empty());
        assert!(engine.state(AlarmKind::Pulsation).is_active());
        assert!(engine.state(AlarmKind::StdDev).is_active());
    }

    #[test]
    fn ovality_keeps_observed_polarity() {
        let (mut engine, _) = engine(LampPolicy::LastTransition);
        let mut s = sample([18.0; 4]);
        s.limits.max_ovality = 5.0;
        engine.evaluate(&inputs(&s));
        assert!(engine.state(AlarmKind::Ovality).is_active());
    }

    #[test]
    fn last_transition_policy_follows_latest_edge() {
        let (mut engine, _) = engine(LampPolicy::LastTransition);
        let s = sample([18.0; 4]);
        let mut i = inputs(&s);
        i.pulsation_peaks = Some(1);
        i.std_devs = Some([0.5; 4]);
        assert_eq!(engine.evaluate(&i).lamp, Some(true));

        // std-dev clears while pulsation is still active: lamp goes off
        i.std_devs = Some([0.0; 4]);
        let eval = engine.evaluate(&i);
        assert_eq!(eval.lamp, Some(false));
        assert!(engine.state(AlarmKind::Pulsation).is_active());
    }

    #[test]
    fn aggregate_policy_is_or_of_all_alarms() {
        let (mut engine, _) = engine(LampPolicy::Aggregate);
        let s = sample([18.0; 4]);
        let mut i = inputs(&s);
        i.pulsation_peaks = Some(1);
        i.std_devs = Some([0.5; 4]);
        assert_eq!(engine.evaluate(&i).lamp, Some(true));

        i.std_devs = Some([0.0; 4]);
        let eval = engine.evaluate(&i);
        assert_eq!(eval.transitions.len(), 1);
        assert_eq!(eval.lamp, None, "pulsation still holds the lamp");

        i.pulsation_peaks = Some(0);
        assert_eq!(engine.evaluate(&i).lamp, Some(false));
    }

    #[test]
    fn sink_failure_does_not_stop_evaluation() {
        let mut engine = AlarmEngine::new(Arc::new(OfflineSink), LampPolicy::LastTransition);
        let eval = engine.evaluate(&inputs(&sample([19.0; 4])));
        assert_eq!(eval.transitions.len(), 1);
        assert_eq!(engine.event_counts(), (0, 1));
        assert!(engine.state(AlarmKind::Diameter).is_active());
    }

    #[test]
    fn zero_preset_centres_on_channel_mean() {
        let (mut engine, _) = engine(LampPolicy::LastTransition);
        let mut s = sample([25.0; 4]);
        s.limits.preset_diameter = 0.0;
        engine.evaluate(&inputs(&s));
        assert_eq!(engine.state(AlarmKind::Diameter), AlarmState::Inactive);
    }
}
