/// Peak height above which a pulse is counted as muon-like, in mV.
pub const MUON_THRESHOLD: f32 = 20.0;
/// Pulse heights at or above this are corrupted bins, not physics.
pub const SATURATION_CEILING: f32 = 10_000.0;

/// Outcome of the two-threshold pulse-height discrimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Muon,
    Neutron,
    Inconclusive,
}

/// Largest surviving pulse height of one channel and where it was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub height: f32,
    pub bin: usize,
}

/// Classification together with the per-pad peaks that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discrimination {
    pub class: Classification,
    pub top: Option<Peak>,
    pub bottom: Option<Peak>,
}

/// Scan one pad for its peak pulse height. The detector pulses are
/// negative-going, so each sample is inverted around `baseline` first.
/// Bins that are NaN, at or above the saturation ceiling, or non-positive
/// are digitizer glitches and never take part in the search.
pub fn find_peak(wave: &[f32], baseline: f32) -> Option<Peak> {
    let mut peak: Option<Peak> = None;
    for (bin, &v) in wave.iter().enumerate() {
        let height = -(v - baseline);
        if height.is_nan() || height >= SATURATION_CEILING || height <= 0.0 {
            continue;
        }
        if peak.map_or(true, |p| height > p.height) {
            peak = Some(Peak { height, bin });
        }
    }
    peak
}

/// Discriminate one event from the calibrated waveforms of the top and
/// bottom detector pads. `baseline` is in the same units as the samples
/// (mV from the decoder).
pub fn classify(top: &[f32], bottom: &[f32], baseline: f32) -> Discrimination {
    let top_peak = find_peak(top, baseline);
    let bottom_peak = find_peak(bottom, baseline);

    let top_height = top_peak.map(|p| p.height);
    let bottom_height = bottom_peak.map(|p| p.height);

    let class = if top_height.is_some_and(|h| h > MUON_THRESHOLD)
        || bottom_height.is_some_and(|h| h > MUON_THRESHOLD)
    {
        Classification::Muon
    } else if top_height.is_some_and(|h| h < MUON_THRESHOLD)
        && bottom_height.is_some_and(|h| h < MUON_THRESHOLD)
    {
        Classification::Neutron
    } else {
        // a peak sitting exactly on the threshold, or a pad with no
        // surviving samples at all
        Classification::Inconclusive
    };

    Discrimination {
        class,
        top: top_peak,
        bottom: bottom_peak,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(baseline: f32, n: usize) -> Vec<f32> {
        vec![baseline; n]
    }

    /// Negative-going pulse of `height` mV at `bin`.
    fn with_pulse(baseline: f32, n: usize, bin: usize, height: f32) -> Vec<f32> {
        let mut w = flat(baseline, n);
        w[bin] = baseline - height;
        w
    }

    #[test]
    fn muon_when_either_pad_exceeds_threshold() {
        let top = with_pulse(450.0, 1024, 300, 35.0);
        let bottom = with_pulse(450.0, 1024, 310, 5.0);
        let d = classify(&top, &bottom, 450.0);
        assert_eq!(d.class, Classification::Muon);
        let peak = d.top.unwrap();
        assert_eq!(peak.bin, 300);
        assert!((peak.height - 35.0).abs() < 1e-4);

        let d = classify(&bottom, &top, 450.0);
        assert_eq!(d.class, Classification::Muon);
    }

    #[test]
    fn neutron_when_both_pads_below_threshold() {
        let top = with_pulse(450.0, 1024, 100, 12.0);
        let bottom = with_pulse(450.0, 1024, 512, 8.0);
        let d = classify(&top, &bottom, 450.0);
        assert_eq!(d.class, Classification::Neutron);
    }

    #[test]
    fn boundary_peak_is_inconclusive() {
        let top = with_pulse(0.0, 1024, 40, MUON_THRESHOLD);
        let bottom = with_pulse(0.0, 1024, 60, 10.0);
        assert_eq!(classify(&top, &bottom, 0.0).class, Classification::Inconclusive);
    }

    #[test]
    fn pad_with_no_surviving_samples_is_inconclusive() {
        // all heights non-positive on the top pad
        let top = flat(0.0, 1024);
        let bottom = with_pulse(0.0, 1024, 60, 10.0);
        let d = classify(&top, &bottom, 0.0);
        assert_eq!(d.class, Classification::Inconclusive);
        assert!(d.top.is_none());
    }

    #[test]
    fn glitched_bins_are_ignored() {
        // valid 30 mV peak plus a NaN and a saturated bin elsewhere
        let mut top = with_pulse(0.0, 1024, 200, 30.0);
        top[400] = f32::NAN;
        top[500] = -20_000.0; // height 20000, above the saturation ceiling
        let bottom = with_pulse(0.0, 1024, 60, 10.0);

        let d = classify(&top, &bottom, 0.0);
        assert_eq!(d.class, Classification::Muon);
        assert_eq!(d.top.unwrap().bin, 200);
    }

    #[test]
    fn corrupting_the_global_peak_keeps_equal_rank_valid_peak() {
        // two equal peaks; replacing one with NaN must not change the outcome
        let mut top = with_pulse(0.0, 1024, 200, 30.0);
        top[700] = -30.0;
        let bottom = flat_bottom();
        let before = classify(&top, &bottom, 0.0);
        top[700] = f32::NAN;
        let after = classify(&top, &bottom, 0.0);
        assert_eq!(before.class, after.class);
        assert_eq!(after.top.unwrap().bin, 200);
    }

    fn flat_bottom() -> Vec<f32> {
        with_pulse(0.0, 1024, 10, 5.0)
    }
}
