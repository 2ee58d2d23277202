/// Streaming linear-interpolation resampler for mono audio
///
/// Keeps the last input sample between calls so block boundaries do not
/// click. Good enough for speech; not meant for music.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Read position, where 0.0 is `last` and 1.0 is the first new sample
    pos: f64,
    last: f32,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate.max(1) as f64,
            pos: 1.0,
            last: 0.0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    /// Resample one block, appending output to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        let n = input.len();
        if n == 0 {
            return;
        }

        let at = |i: usize| if i == 0 { self.last } else { input[i - 1] };
        while self.pos <= n as f64 {
            let i = self.pos.floor() as usize;
            let frac = (self.pos - i as f64) as f32;
            let a = at(i);
            let b = if i < n { at(i + 1) } else { a };
            out.push(a + (b - a) * frac);
            self.pos += self.step;
        }

        self.pos -= n as f64;
        self.last = input[n - 1];
    }

    /// Resample a complete buffer in one go
    ///
    /// Yields `ceil(len * to / from)` samples; the tail that a streaming
    /// caller would get from the next block holds the last input sample.
    pub fn convert(from_rate: u32, to_rate: u32, input: &[f32]) -> Vec<f32> {
        let mut resampler = Self::new(from_rate, to_rate);
        if resampler.is_passthrough() {
            return input.to_vec();
        }

        let expected =
            (input.len() as f64 * to_rate as f64 / from_rate.max(1) as f64).ceil() as usize;
        let mut out = Vec::with_capacity(expected);
        resampler.process(input, &mut out);
        out.resize(expected, input.last().copied().unwrap_or(0.0));
        out
    }
}
