//! Axis-aligned pixel boxes.

use crate::common::*;

/// Bounding box in TLBR order, pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TLBR {
    t: f32,
    l: f32,
    b: f32,
    r: f32,
}

impl TLBR {
    pub fn try_from_tlbr(tlbr: [f32; 4]) -> Result<Self> {
        let [t, l, b, r] = tlbr;
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold, got {:?}", tlbr);
        Ok(Self { t, l, b, r })
    }

    pub fn try_from_tlhw(tlhw: [f32; 4]) -> Result<Self> {
        let [t, l, h, w] = tlhw;
        Self::try_from_tlbr([t, l, t + h, l + w])
    }

    pub fn t(&self) -> f32 {
        self.t
    }

    pub fn l(&self) -> f32 {
        self.l
    }

    pub fn b(&self) -> f32 {
        self.b
    }

    pub fn r(&self) -> f32 {
        self.r
    }

    pub fn h(&self) -> f32 {
        self.b - self.t
    }

    pub fn w(&self) -> f32 {
        self.r - self.l
    }

    /// Clip the box to a `[x1, y1, x2, y2]` window and shift it into
    /// window-local coordinates. A box that collapses to non-positive width
    /// or height is dropped.
    pub fn crop_to(&self, window: [usize; 4]) -> Option<TLBR> {
        let [wx1, wy1, wx2, wy2] = window.map(|v| v as f32);

        let t = self.t.max(wy1) - wy1;
        let l = self.l.max(wx1) - wx1;
        let b = self.b.min(wy2) - wy1;
        let r = self.r.min(wx2) - wx1;

        (b > t && r > l).then(|| TLBR { t, l, b, r })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlbr_rejects_flipped_corners() {
        assert!(TLBR::try_from_tlbr([10.0, 10.0, 5.0, 20.0]).is_err());
        assert!(TLBR::try_from_tlbr([0.0, 0.0, 4.0, 4.0]).is_ok());
    }

    #[test]
    fn crop_translates_into_window_coordinates() {
        let bbox = TLBR::try_from_tlbr([10.0, 20.0, 30.0, 40.0]).unwrap();
        let cropped = bbox.crop_to([15, 5, 35, 25]).unwrap();
        assert_eq!(
            (cropped.t(), cropped.l(), cropped.b(), cropped.r()),
            (5.0, 5.0, 20.0, 20.0)
        );
    }

    #[test]
    fn crop_drops_boxes_outside_the_window() {
        let bbox = TLBR::try_from_tlbr([0.0, 0.0, 10.0, 10.0]).unwrap();
        assert!(bbox.crop_to([20, 20, 40, 40]).is_none());
    }
}
