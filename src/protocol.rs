use crate::input::joystick::StickVector;

/**
 * Builds the ASCII payload understood by the rover firmware: `X:<x>,Y:<y>`
 * with both components formatted to two decimals and no terminator. Each
 * write carries exactly one command. Values outside [-1, 1] are formatted
 * as-is; the joystick is the only producer and already clamps.
 */
pub fn encode_drive_command(vector: StickVector) -> Vec<u8> {
    format!("X:{:.2},Y:{:.2}", vector.x, vector.y).into_bytes()
}

/**
 * One outbound command: the encoded payload plus a sequence number used to
 * correlate submissions with write completions in the log. The sequence
 * number is never part of the payload.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveCommand {
    pub payload: Vec<u8>,
    pub seq: u64,
}

impl DriveCommand {
    pub fn new(vector: StickVector, seq: u64) -> DriveCommand {
        DriveCommand {
            payload: encode_drive_command(vector),
            seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::joystick::Joystick;

    fn vector(x: f32, y: f32) -> StickVector {
        StickVector { x, y }
    }

    #[test]
    fn encodes_two_decimals_without_terminator() {
        assert_eq!(encode_drive_command(vector(0.5, -0.75)), b"X:0.50,Y:-0.75");
        assert_eq!(encode_drive_command(vector(0.0, 0.0)), b"X:0.00,Y:0.00");
        assert_eq!(encode_drive_command(vector(-1.0, 1.0)), b"X:-1.00,Y:1.00");
    }

    #[test]
    fn encoding_is_deterministic() {
        let first = encode_drive_command(vector(0.33, -0.67));
        let second = encode_drive_command(vector(0.33, -0.67));
        assert_eq!(first, second);
    }

    #[test]
    fn out_of_range_values_format_verbatim() {
        assert_eq!(encode_drive_command(vector(2.5, -3.0)), b"X:2.50,Y:-3.00");
    }

    #[test]
    fn sequence_number_stays_out_of_the_payload() {
        let command = DriveCommand::new(vector(0.25, 0.25), 41);
        assert_eq!(command.seq, 41);
        assert_eq!(command.payload, b"X:0.25,Y:0.25");
    }

    #[test]
    fn full_push_right_encodes_to_unit_x() {
        let mut joystick = Joystick::new(0.0, 0.0, 100.0, 20.0);
        let vector = joystick.update(100.0, 0.0);
        assert_eq!(encode_drive_command(vector), b"X:1.00,Y:0.00");
        assert_eq!(joystick.knob(), (80.0, 0.0));
    }

    #[test]
    fn half_push_up_encodes_to_half_y() {
        let mut joystick = Joystick::new(0.0, 0.0, 100.0, 20.0);
        let vector = joystick.update(0.0, -40.0);
        assert_eq!(encode_drive_command(vector), b"X:0.00,Y:-0.50");
    }
}
