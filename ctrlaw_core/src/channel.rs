/// Ordered, named channels with the per-channel state the correction law works on.
///
/// Every vector has one entry per name.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet {
    names: Vec<String>,
    pub value: Vec<f64>,
    pub old: Vec<f64>,
    pub delta: Vec<f64>,
    pub initial: Vec<f64>,
    /// Channels eligible for despiking.
    pub despike: Vec<bool>,
}

impl ChannelSet {
    pub fn new(names: Vec<String>) -> Self {
        let n = names.len();
        Self {
            names,
            value: vec![0.0; n],
            old: vec![0.0; n],
            delta: vec![0.0; n],
            initial: vec![0.0; n],
            despike: vec![false; n],
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Shift `value` into `old` and take `fresh` as the new value.
    pub fn update(&mut self, fresh: &[f64]) {
        debug_assert_eq!(fresh.len(), self.len());
        for i in 0..self.len() {
            self.old[i] = self.value[i];
            self.value[i] = fresh[i];
            self.delta[i] = self.value[i] - self.old[i];
        }
    }

    pub fn capture_initial(&mut self) {
        self.initial.copy_from_slice(&self.value);
    }

    /// Index of the first non-finite entry of `value` or `delta`.
    pub fn first_non_finite(&self) -> Option<usize> {
        (0..self.len()).find(|&i| !self.value[i].is_finite() || !self.delta[i].is_finite())
    }
}
