/**
 * Fraction of the half view size used for the boundary circle.
 */
pub const OUTER_RADIUS_FACTOR: f32 = 0.8;

/**
 * Size of the knob relative to the boundary circle.
 */
pub const KNOB_RADIUS_FACTOR: f32 = 0.3;

/**
 * Normalized joystick displacement. Both components are in [-1, 1]:
 * the knob offset from the center as a fraction of the maximum travel
 * (boundary radius minus knob radius).
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StickVector {
    pub x: f32,
    pub y: f32,
}

impl StickVector {
    pub const ZERO: StickVector = StickVector { x: 0.0, y: 0.0 };
}

/**
 * Turns raw pointer coordinates into normalized displacement vectors.
 * Holds the last knob position so whatever renders the control can draw it;
 * everything else is plain geometry.
 */
#[derive(Debug, Clone)]
pub struct Joystick {
    center_x: f32,
    center_y: f32,
    outer_radius: f32,
    knob_radius: f32,
    knob_x: f32,
    knob_y: f32,
}

impl Joystick {
    pub fn new(center_x: f32, center_y: f32, outer_radius: f32, knob_radius: f32) -> Joystick {
        Joystick {
            center_x,
            center_y,
            outer_radius,
            knob_radius,
            knob_x: center_x,
            knob_y: center_y,
        }
    }

    /**
     * Derives the geometry from a view size: centered, boundary circle at
     * 80% of the half size, knob at 30% of the boundary.
     */
    pub fn from_view_size(width: f32, height: f32) -> Joystick {
        let outer_radius = width.min(height) / 2.0 * OUTER_RADIUS_FACTOR;
        let knob_radius = outer_radius * KNOB_RADIUS_FACTOR;
        Joystick::new(width / 2.0, height / 2.0, outer_radius, knob_radius)
    }

    fn max_travel(&self) -> f32 {
        self.outer_radius - self.knob_radius
    }

    /**
     * Moves the knob towards the touch point and returns the normalized
     * displacement. Touch points past the maximum travel are clamped to the
     * boundary circle along the same angle, so the knob never leaves the
     * control no matter how far the pointer strays.
     */
    pub fn update(&mut self, touch_x: f32, touch_y: f32) -> StickVector {
        let max_travel = self.max_travel();
        if max_travel <= 0.0 {
            // view has no usable size yet
            self.knob_x = self.center_x;
            self.knob_y = self.center_y;
            return StickVector::ZERO;
        }

        let dx = touch_x - self.center_x;
        let dy = touch_y - self.center_y;
        let distance = (dx * dx + dy * dy).sqrt();

        if distance < max_travel {
            self.knob_x = touch_x;
            self.knob_y = touch_y;
        } else {
            let angle = dy.atan2(dx);
            self.knob_x = self.center_x + angle.cos() * max_travel;
            self.knob_y = self.center_y + angle.sin() * max_travel;
        }

        StickVector {
            x: (self.knob_x - self.center_x) / max_travel,
            y: (self.knob_y - self.center_y) / max_travel,
        }
    }

    /**
     * Recenters the knob. Always reports neutral.
     */
    pub fn release(&mut self) -> StickVector {
        self.knob_x = self.center_x;
        self.knob_y = self.center_y;
        StickVector::ZERO
    }

    /**
     * Current knob position, for whatever draws the control.
     */
    pub fn knob(&self) -> (f32, f32) {
        (self.knob_x, self.knob_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_inside_the_travel_circle_is_not_clamped() {
        let mut joystick = Joystick::new(100.0, 100.0, 100.0, 20.0);
        let vector = joystick.update(100.0, 60.0);
        assert_eq!(vector, StickVector { x: 0.0, y: -0.5 });
        assert_eq!(joystick.knob(), (100.0, 60.0));
    }

    #[test]
    fn touch_outside_the_travel_circle_clamps_to_the_boundary() {
        let mut joystick = Joystick::new(100.0, 100.0, 100.0, 20.0);
        let vector = joystick.update(1_000_000.0, 100.0);
        assert_eq!(vector, StickVector { x: 1.0, y: 0.0 });
        assert_eq!(joystick.knob(), (180.0, 100.0));
    }

    #[test]
    fn no_touch_point_escapes_the_clamp() {
        let mut joystick = Joystick::new(50.0, 50.0, 100.0, 20.0);
        let extremes = [
            (f32::MAX, 0.0),
            (0.0, f32::MAX),
            (-1.0e8, -1.0e8),
            (50.0, 50.0),
            (1234.5, -9876.5),
        ];
        for (touch_x, touch_y) in extremes {
            let vector = joystick.update(touch_x, touch_y);
            assert!(vector.x >= -1.0 && vector.x <= 1.0, "x escaped: {:?}", vector);
            assert!(vector.y >= -1.0 && vector.y <= 1.0, "y escaped: {:?}", vector);
        }
    }

    #[test]
    fn release_recenters_and_reports_neutral() {
        let mut joystick = Joystick::new(100.0, 100.0, 100.0, 20.0);
        joystick.update(150.0, 150.0);
        let vector = joystick.release();
        assert_eq!(vector, StickVector::ZERO);
        assert_eq!(joystick.knob(), (100.0, 100.0));
    }

    #[test]
    fn degenerate_geometry_reports_neutral() {
        let mut joystick = Joystick::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(joystick.update(500.0, 500.0), StickVector::ZERO);

        let mut unsized_joystick = Joystick::from_view_size(0.0, 0.0);
        assert_eq!(unsized_joystick.update(1.0, 1.0), StickVector::ZERO);
    }

    #[test]
    fn view_size_derivation_matches_the_control_proportions() {
        let joystick = Joystick::from_view_size(250.0, 400.0);
        assert_eq!(joystick.center_x, 125.0);
        assert_eq!(joystick.center_y, 200.0);
        assert!((joystick.outer_radius - 100.0).abs() < 1e-3);
        assert!((joystick.knob_radius - 30.0).abs() < 1e-3);
    }
}
