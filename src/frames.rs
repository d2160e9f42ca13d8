/// Rate limits a camera stream by processing only every Nth frame.
#[derive(Debug)]
pub struct FrameSampler {
    every: u32,
    frame_id: u64,
}

impl FrameSampler {
    /// `every` of 0 or 1 processes all frames.
    pub fn new(every: u32) -> Self {
        FrameSampler {
            every: every.max(1),
            frame_id: 0,
        }
    }

    pub fn should_process(&mut self) -> bool {
        let process = self.frame_id % u64::from(self.every) == 0;
        self.frame_id += 1;
        process
    }
}
