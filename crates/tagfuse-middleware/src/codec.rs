//! Fixed binary layout for the wire types.
//!
//! All values are little-endian with no padding:
//!
//! - Observation (68 bytes): `u32 id`, then `x0 y0 x1 y1 x2 y2 x3 y3` as `f64`.
//! - PoseEstimate (80 bytes): `x y theta x_sigma y_sigma theta_sigma dx dy
//!   dtheta dt` as `f64`.
//! - OdometryDelta (32 bytes): `dx dy dtheta dt` as `f64`.
//! - Observation frame: `u8 topic_len`, topic (UTF-8), `u16 count`, then
//!   `count` observations.

use tagfuse_types::{LocError, Observation, OdometryDelta, PoseEstimate};

/// Encoded size of one [`Observation`].
pub const OBSERVATION_SIZE: usize = 4 + 8 * 8;

/// Encoded size of one [`PoseEstimate`].
pub const POSE_ESTIMATE_SIZE: usize = 10 * 8;

/// Encoded size of one [`OdometryDelta`].
pub const ODOMETRY_SIZE: usize = 4 * 8;

pub fn encode_observation(obs: &Observation, out: &mut Vec<u8>) {
    out.extend_from_slice(&obs.id.to_le_bytes());
    for [u, v] in obs.corners() {
        out.extend_from_slice(&u.to_le_bytes());
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn decode_observation(buf: &[u8]) -> Result<Observation, LocError> {
    check_len("Observation", buf, OBSERVATION_SIZE)?;
    let id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let f = read_f64s::<8>(&buf[4..]);
    Ok(Observation::from_corners(
        id,
        [[f[0], f[1]], [f[2], f[3]], [f[4], f[5]], [f[6], f[7]]],
    ))
}

pub fn encode_pose(estimate: &PoseEstimate) -> Vec<u8> {
    let fields = [
        estimate.x,
        estimate.y,
        estimate.theta,
        estimate.x_sigma,
        estimate.y_sigma,
        estimate.theta_sigma,
        estimate.dx,
        estimate.dy,
        estimate.dtheta,
        estimate.dt,
    ];
    let mut out = Vec::with_capacity(POSE_ESTIMATE_SIZE);
    for v in fields {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_pose(buf: &[u8]) -> Result<PoseEstimate, LocError> {
    check_len("PoseEstimate", buf, POSE_ESTIMATE_SIZE)?;
    let [x, y, theta, x_sigma, y_sigma, theta_sigma, dx, dy, dtheta, dt] = read_f64s::<10>(buf);
    Ok(PoseEstimate {
        x,
        y,
        theta,
        x_sigma,
        y_sigma,
        theta_sigma,
        dx,
        dy,
        dtheta,
        dt,
    })
}

pub fn encode_odometry(delta: &OdometryDelta) -> Vec<u8> {
    let mut out = Vec::with_capacity(ODOMETRY_SIZE);
    for v in [delta.dx, delta.dy, delta.dtheta, delta.dt] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_odometry(buf: &[u8]) -> Result<OdometryDelta, LocError> {
    check_len("OdometryDelta", buf, ODOMETRY_SIZE)?;
    let [dx, dy, dtheta, dt] = read_f64s::<4>(buf);
    Ok(OdometryDelta { dx, dy, dtheta, dt })
}

/// Encode a topic-addressed batch of observations.
///
/// # Errors
///
/// Returns [`LocError::Codec`] if the topic is longer than 255 bytes or the
/// batch holds more than `u16::MAX` observations.
pub fn encode_frame(topic: &str, observations: &[Observation]) -> Result<Vec<u8>, LocError> {
    let topic_len = u8::try_from(topic.len())
        .map_err(|_| LocError::Codec(format!("topic too long: {} bytes", topic.len())))?;
    let count = u16::try_from(observations.len())
        .map_err(|_| LocError::Codec(format!("too many observations: {}", observations.len())))?;

    let mut out =
        Vec::with_capacity(1 + topic.len() + 2 + observations.len() * OBSERVATION_SIZE);
    out.push(topic_len);
    out.extend_from_slice(topic.as_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    for obs in observations {
        encode_observation(obs, &mut out);
    }
    Ok(out)
}

/// Decode a frame produced by [`encode_frame`].
pub fn decode_frame(buf: &[u8]) -> Result<(String, Vec<Observation>), LocError> {
    let (&topic_len, rest) = buf
        .split_first()
        .ok_or_else(|| LocError::Codec("empty frame".to_string()))?;
    let topic_len = topic_len as usize;
    if rest.len() < topic_len + 2 {
        return Err(LocError::Codec(format!(
            "frame truncated: {} bytes after topic length {topic_len}",
            rest.len()
        )));
    }
    let topic = std::str::from_utf8(&rest[..topic_len])
        .map_err(|e| LocError::Codec(format!("topic is not UTF-8: {e}")))?
        .to_string();
    let count = u16::from_le_bytes([rest[topic_len], rest[topic_len + 1]]) as usize;
    let body = &rest[topic_len + 2..];
    check_len("observation frame body", body, count * OBSERVATION_SIZE)?;

    let observations = body
        .chunks_exact(OBSERVATION_SIZE)
        .map(decode_observation)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((topic, observations))
}

fn check_len(what: &str, buf: &[u8], expected: usize) -> Result<(), LocError> {
    if buf.len() != expected {
        return Err(LocError::Codec(format!(
            "{what}: expected {expected} bytes, got {}",
            buf.len()
        )));
    }
    Ok(())
}

fn read_f64s<const N: usize>(buf: &[u8]) -> [f64; N] {
    let mut out = [0.0; N];
    for (slot, chunk) in out.iter_mut().zip(buf.chunks_exact(8)) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        *slot = f64::from_le_bytes(bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blip() -> Observation {
        Observation::from_corners(
            3,
            [[190.0, 210.0], [210.0, 210.0], [210.0, 190.0], [190.0, 190.0]],
        )
    }

    #[test]
    fn observation_layout_is_id_then_corners() {
        let mut buf = Vec::new();
        encode_observation(&blip(), &mut buf);
        assert_eq!(buf.len(), OBSERVATION_SIZE);
        assert_eq!(&buf[..4], &3u32.to_le_bytes());
        assert_eq!(&buf[4..12], &190.0f64.to_le_bytes());
        assert_eq!(&buf[60..68], &190.0f64.to_le_bytes());
        assert_eq!(decode_observation(&buf).unwrap(), blip());
    }

    #[test]
    fn pose_layout_is_ten_doubles_in_field_order() {
        let estimate = PoseEstimate {
            x: 2.351,
            theta_sigma: 0.707,
            dt: 0.02,
            ..Default::default()
        };
        let buf = encode_pose(&estimate);
        assert_eq!(buf.len(), POSE_ESTIMATE_SIZE);
        assert_eq!(&buf[..8], &2.351f64.to_le_bytes());
        assert_eq!(&buf[40..48], &0.707f64.to_le_bytes());
        assert_eq!(&buf[72..80], &0.02f64.to_le_bytes());
        assert_eq!(decode_pose(&buf).unwrap(), estimate);
    }

    #[test]
    fn odometry_layout() {
        let delta = OdometryDelta {
            dx: 0.5,
            dy: -0.25,
            dtheta: 0.1,
            dt: 0.02,
        };
        let buf = encode_odometry(&delta);
        assert_eq!(buf.len(), ODOMETRY_SIZE);
        assert_eq!(decode_odometry(&buf).unwrap(), delta);
    }

    #[test]
    fn frame_carries_topic_and_batch() {
        let frame = encode_frame("vision/unknown/0/Observation", &[blip(), blip()]).unwrap();
        let (topic, observations) = decode_frame(&frame).unwrap();
        assert_eq!(topic, "vision/unknown/0/Observation");
        assert_eq!(observations, vec![blip(), blip()]);
    }

    #[test]
    fn empty_batch_frame_is_valid() {
        let frame = encode_frame("foo/1", &[]).unwrap();
        let (topic, observations) = decode_frame(&frame).unwrap();
        assert_eq!(topic, "foo/1");
        assert!(observations.is_empty());
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(decode_pose(&[0u8; 79]).is_err());
        assert!(decode_observation(&[0u8; 10]).is_err());
        assert!(decode_frame(&[]).is_err());
        assert!(decode_frame(&[5, b'a']).is_err());

        let mut frame = encode_frame("foo", &[blip()]).unwrap();
        frame.pop();
        assert!(matches!(decode_frame(&frame), Err(LocError::Codec(_))));
    }

    #[test]
    fn oversized_topic_is_rejected() {
        let topic = "t".repeat(300);
        assert!(encode_frame(&topic, &[]).is_err());
    }
}
