//! Keyframe animation nodes.
//!
//! A channel samples a pair of data arrays (timestamps and keyframes) at
//! the node's elapsed play time and writes the interpolated value to its
//! output leaf. Cubic interpolation follows the Hermite form of glTF 2.0
//! Appendix C, with tangents scaled by the segment duration.

use crate::nodes::data_array::{ArrayData, DataArray};
use crate::property::{PropertyId, PropertyPool};
use crate::value::{PropertyKind, PropertyValue, Vec2f};
use crate::DataArrayId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationType {
    Step,
    Linear,
    Cubic,
    LinearQuaternion,
    CubicQuaternion,
}

impl InterpolationType {
    pub fn is_cubic(self) -> bool {
        matches!(
            self,
            InterpolationType::Cubic | InterpolationType::CubicQuaternion
        )
    }

    pub fn is_quaternion(self) -> bool {
        matches!(
            self,
            InterpolationType::LinearQuaternion | InterpolationType::CubicQuaternion
        )
    }
}

/// One animated output of an animation node.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationChannel {
    pub name: String,
    /// Float array of strictly ascending timestamps, at least one element.
    pub timestamps: DataArrayId,
    /// Same length as `timestamps`; element type becomes the output type.
    pub keyframes: DataArrayId,
    pub interpolation: InterpolationType,
    /// Required iff the interpolation is cubic; same type and length as
    /// the keyframes.
    pub tangents_in: Option<DataArrayId>,
    pub tangents_out: Option<DataArrayId>,
}

// Input child indices, fixed by the node's schema.
const IN_TIME_DELTA: usize = 0;
const IN_PLAY: usize = 1;
const IN_LOOP: usize = 2;
const IN_REWIND_ON_STOP: usize = 3;
const IN_TIME_RANGE: usize = 4;
// Output child 0 is `progress`, channels start at 1.
const OUT_PROGRESS: usize = 0;
const OUT_CHANNELS_BEGIN: usize = 1;

#[derive(Debug)]
pub struct AnimationNode {
    channels: Vec<AnimationChannel>,
    /// Longest channel end timestamp; the fallback play range end.
    duration: f32,
    /// Elapsed play time. Runtime state, not persisted.
    elapsed: f32,
    /// True while the animation is playing and not yet done; keeps the
    /// node scheduled even when its inputs hold still.
    active: bool,
}

impl AnimationNode {
    pub(crate) fn new(channels: Vec<AnimationChannel>, duration: f32) -> Self {
        AnimationNode {
            channels,
            duration,
            elapsed: 0.0,
            active: false,
        }
    }

    pub fn channels(&self) -> &[AnimationChannel] {
        &self.channels
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub(crate) fn wants_update(&self) -> bool {
        self.active
    }

    pub(crate) fn update(
        &mut self,
        input: Option<PropertyId>,
        output: Option<PropertyId>,
        pool: &mut PropertyPool,
        arrays: &BTreeMap<DataArrayId, DataArray>,
    ) -> Result<(), String> {
        let (input, output) = match (input, output) {
            (Some(input), Some(output)) => (input, output),
            _ => return Err("animation node has no property trees".into()),
        };

        let mut time_delta: f32 = read_input(pool, input, IN_TIME_DELTA)?;
        if time_delta < 0.0 {
            return Err(format!("cannot use negative timeDelta ({time_delta})"));
        }

        let play: bool = read_input(pool, input, IN_PLAY)?;
        if !play {
            self.active = false;
            let rewind: bool = read_input(pool, input, IN_REWIND_ON_STOP)?;
            if self.elapsed > 0.0 && rewind {
                // Rewind: reset progress and fall through with a zero delta.
                self.elapsed = 0.0;
                time_delta = 0.0;
            } else {
                return Ok(());
            }
        }

        let requested_range: Vec2f = read_input(pool, input, IN_TIME_RANGE)?;
        let begin = requested_range[0];
        let mut end = requested_range[1];
        if end <= 0.0 {
            // End of range not set, play up to the longest channel.
            end = self.duration;
        }
        if begin < 0.0 || begin >= end {
            return Err(format!(
                "time range begin must be smaller than end and not negative (given time range [{}, {}])",
                requested_range[0], requested_range[1]
            ));
        }
        let duration = end - begin;

        let looping: bool = read_input(pool, input, IN_LOOP)?;
        if self.elapsed >= duration && !looping {
            self.active = false;
            return Ok(());
        }

        self.elapsed += time_delta;
        if looping {
            // Wrap around and start over from the beginning.
            self.elapsed %= duration;
        }
        self.elapsed = self.elapsed.min(duration);
        self.active = play && (looping || self.elapsed < duration);

        for (index, channel) in self.channels.iter().enumerate() {
            let value = sample_channel(channel, self.elapsed + begin, arrays)?;
            let target = pool
                .child_by_index(output, OUT_CHANNELS_BEGIN + index)
                .ok_or_else(|| format!("missing output for channel '{}'", channel.name))?;
            pool.set_node_output(target, value).map_err(|e| e.to_string())?;
        }

        let progress = pool
            .child_by_index(output, OUT_PROGRESS)
            .ok_or("missing progress output")?;
        pool.set_node_output(progress, PropertyValue::Float(self.elapsed / duration))
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Checks a channel configuration against the engine's data arrays and
/// returns the channel's end timestamp.
pub(crate) fn validate_channel(
    arrays: &BTreeMap<DataArrayId, DataArray>,
    channel: &AnimationChannel,
) -> Result<f32, crate::errors::TangleError> {
    use crate::errors::TangleError;
    let fail = |message: String| Err(TangleError::Schema(message));

    let timestamps = match arrays.get(&channel.timestamps) {
        Some(array) => array,
        None => {
            return Err(TangleError::NotFound(format!(
                "timestamp data array of channel '{}' does not exist in this engine",
                channel.name
            )))
        }
    };
    let stamps = match timestamps.data() {
        ArrayData::Float(v) => v,
        _ => return fail(format!("channel '{}' timestamps must be of type Float", channel.name)),
    };
    if stamps.is_empty() {
        return fail(format!("channel '{}' needs at least one keyframe", channel.name));
    }
    if stamps.windows(2).any(|pair| pair[0] >= pair[1]) {
        return fail(format!(
            "channel '{}' timestamps must be strictly ascending",
            channel.name
        ));
    }

    let keyframes = match arrays.get(&channel.keyframes) {
        Some(array) => array,
        None => {
            return Err(TangleError::NotFound(format!(
                "keyframe data array of channel '{}' does not exist in this engine",
                channel.name
            )))
        }
    };
    if keyframes.len() != stamps.len() {
        return fail(format!(
            "channel '{}' has {} timestamps but {} keyframes",
            channel.name,
            stamps.len(),
            keyframes.len()
        ));
    }
    if channel.interpolation.is_quaternion() && keyframes.kind() != PropertyKind::Vec4f {
        return fail(format!(
            "channel '{}' uses quaternion interpolation and needs Vec4f keyframes",
            channel.name
        ));
    }

    if channel.interpolation.is_cubic() {
        for (what, id) in [("in", channel.tangents_in), ("out", channel.tangents_out)] {
            let id = match id {
                Some(id) => id,
                None => {
                    return fail(format!(
                        "channel '{}' uses cubic interpolation but has no {}-tangents",
                        channel.name, what
                    ))
                }
            };
            let tangents = match arrays.get(&id) {
                Some(array) => array,
                None => {
                    return Err(TangleError::NotFound(format!(
                        "{}-tangent data array of channel '{}' does not exist in this engine",
                        what, channel.name
                    )))
                }
            };
            if tangents.kind() != keyframes.kind() || tangents.len() != keyframes.len() {
                return fail(format!(
                    "channel '{}' {}-tangents must match the keyframes in type and length",
                    channel.name, what
                ));
            }
        }
    } else if channel.tangents_in.is_some() || channel.tangents_out.is_some() {
        return fail(format!(
            "channel '{}' has tangents but does not use cubic interpolation",
            channel.name
        ));
    }

    Ok(*stamps.last().expect("emptiness was checked above"))
}

fn read_input<T: crate::value::PropertyData>(
    pool: &PropertyPool,
    input: PropertyId,
    index: usize,
) -> Result<T, String> {
    let id = pool
        .child_by_index(input, index)
        .ok_or("animation input schema is incomplete")?;
    pool.get_value(id)
        .ok_or_else(|| "animation input has an unexpected type".to_string())
}

fn array<'a>(
    arrays: &'a BTreeMap<DataArrayId, DataArray>,
    id: DataArrayId,
    what: &str,
    channel: &AnimationChannel,
) -> Result<&'a DataArray, String> {
    arrays
        .get(&id)
        .ok_or_else(|| format!("{} data of channel '{}' is missing", what, channel.name))
}

fn element(data: &ArrayData, index: usize, what: &str) -> Result<PropertyValue, String> {
    data.element(index)
        .ok_or_else(|| format!("{what} data is shorter than the timestamps"))
}

/// Samples one channel at an absolute channel time.
fn sample_channel(
    channel: &AnimationChannel,
    time: f32,
    arrays: &BTreeMap<DataArrayId, DataArray>,
) -> Result<PropertyValue, String> {
    let timestamps = array(arrays, channel.timestamps, "timestamp", channel)?;
    let stamps = match timestamps.data() {
        ArrayData::Float(v) => v,
        _ => return Err(format!("timestamps of channel '{}' are not floats", channel.name)),
    };
    if stamps.is_empty() {
        return Err(format!("channel '{}' has no timestamps", channel.name));
    }

    // Bracketing pair around `time`; both ends clamp to the range.
    let upper = stamps.partition_point(|&t| t <= time);
    let lower = upper.saturating_sub(1);
    let upper = upper.min(stamps.len() - 1);

    let segment = stamps[upper] - stamps[lower];
    let mut ratio = 0.0;
    if upper != lower {
        ratio = (time - stamps[lower]) / segment;
    }
    // Clamping is not needed mathematically, it guards float precision.
    ratio = ratio.clamp(0.0, 1.0);

    let keyframes = array(arrays, channel.keyframes, "keyframe", channel)?;
    let k0 = element(keyframes.data(), lower, "keyframe")?;
    let k1 = element(keyframes.data(), upper, "keyframe")?;

    let mut value = match channel.interpolation {
        InterpolationType::Step => k0,
        InterpolationType::Linear | InterpolationType::LinearQuaternion => {
            interpolate_linear(&k0, &k1, ratio)
        }
        InterpolationType::Cubic | InterpolationType::CubicQuaternion => {
            let tangents_in = channel
                .tangents_in
                .ok_or_else(|| format!("channel '{}' is cubic but has no in-tangents", channel.name))?;
            let tangents_out = channel
                .tangents_out
                .ok_or_else(|| format!("channel '{}' is cubic but has no out-tangents", channel.name))?;
            let m0 = element(array(arrays, tangents_out, "tangent", channel)?.data(), lower, "tangent")?;
            let m1 = element(array(arrays, tangents_in, "tangent", channel)?.data(), upper, "tangent")?;
            interpolate_cubic(&k0, &k1, &m0, &m1, ratio, segment)
        }
    };

    if channel.interpolation.is_quaternion() {
        value = normalize_quaternion(value)?;
    }
    Ok(value)
}

/// Decomposes an interpolatable value into up to four float lanes.
fn lanes(value: &PropertyValue) -> ([f32; 4], usize) {
    let mut l = [0.0f32; 4];
    let n = match value {
        PropertyValue::Float(v) => {
            l[0] = *v;
            1
        }
        PropertyValue::Int32(v) => {
            l[0] = *v as f32;
            1
        }
        PropertyValue::Vec2f(v) => {
            l[..2].copy_from_slice(v);
            2
        }
        PropertyValue::Vec3f(v) => {
            l[..3].copy_from_slice(v);
            3
        }
        PropertyValue::Vec4f(v) => {
            l.copy_from_slice(v);
            4
        }
        PropertyValue::Vec2i(v) => {
            for (lane, c) in l.iter_mut().zip(v.iter()) {
                *lane = *c as f32;
            }
            2
        }
        PropertyValue::Vec3i(v) => {
            for (lane, c) in l.iter_mut().zip(v.iter()) {
                *lane = *c as f32;
            }
            3
        }
        PropertyValue::Vec4i(v) => {
            for (lane, c) in l.iter_mut().zip(v.iter()) {
                *lane = *c as f32;
            }
            4
        }
        PropertyValue::Bool(_) | PropertyValue::String(_) => 0,
    };
    (l, n)
}

/// Reassembles lanes into a value of `kind`, rounding integer components.
fn from_lanes(kind: PropertyKind, l: [f32; 4]) -> PropertyValue {
    let i = |x: f32| x.round() as i32;
    match kind {
        PropertyKind::Float => PropertyValue::Float(l[0]),
        PropertyKind::Vec2f => PropertyValue::Vec2f([l[0], l[1]]),
        PropertyKind::Vec3f => PropertyValue::Vec3f([l[0], l[1], l[2]]),
        PropertyKind::Vec4f => PropertyValue::Vec4f(l),
        PropertyKind::Int32 => PropertyValue::Int32(i(l[0])),
        PropertyKind::Vec2i => PropertyValue::Vec2i([i(l[0]), i(l[1])]),
        PropertyKind::Vec3i => PropertyValue::Vec3i([i(l[0]), i(l[1]), i(l[2])]),
        PropertyKind::Vec4i => PropertyValue::Vec4i([i(l[0]), i(l[1]), i(l[2]), i(l[3])]),
        _ => unreachable!("channel kinds are validated at creation"),
    }
}

fn interpolate_linear(k0: &PropertyValue, k1: &PropertyValue, ratio: f32) -> PropertyValue {
    let (a, n) = lanes(k0);
    let (b, _) = lanes(k1);
    let mut out = [0.0f32; 4];
    for lane in 0..n {
        out[lane] = a[lane] + ratio * (b[lane] - a[lane]);
    }
    from_lanes(k0.kind(), out)
}

fn interpolate_cubic(
    k0: &PropertyValue,
    k1: &PropertyValue,
    tangent_out: &PropertyValue,
    tangent_in: &PropertyValue,
    ratio: f32,
    segment: f32,
) -> PropertyValue {
    let (p0, n) = lanes(k0);
    let (p1, _) = lanes(k1);
    let (t_out, _) = lanes(tangent_out);
    let (t_in, _) = lanes(tangent_in);

    let t = ratio;
    let t2 = t * t;
    let t3 = t2 * t;
    let mut out = [0.0f32; 4];
    for lane in 0..n {
        let m0 = segment * t_out[lane];
        let m1 = segment * t_in[lane];
        out[lane] = (2.0 * t3 - 3.0 * t2 + 1.0) * p0[lane]
            + (t3 - 2.0 * t2 + t) * m0
            + (-2.0 * t3 + 3.0 * t2) * p1[lane]
            + (t3 - t2) * m1;
    }
    from_lanes(k0.kind(), out)
}

fn normalize_quaternion(value: PropertyValue) -> Result<PropertyValue, String> {
    match value {
        PropertyValue::Vec4f(q) => {
            let factor =
                1.0 / (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
            Ok(PropertyValue::Vec4f([
                q[0] * factor,
                q[1] * factor,
                q[2] * factor,
                q[3] * factor,
            ]))
        }
        _ => Err("quaternion channels must have Vec4f keyframes".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrays_with(entries: Vec<(u64, ArrayData)>) -> BTreeMap<DataArrayId, DataArray> {
        entries
            .into_iter()
            .map(|(id, data)| {
                (
                    DataArrayId(id),
                    DataArray::new(DataArrayId(id), format!("array-{id}"), data),
                )
            })
            .collect()
    }

    fn linear_channel() -> (AnimationChannel, BTreeMap<DataArrayId, DataArray>) {
        let arrays = arrays_with(vec![
            (1, ArrayData::Float(vec![0.0, 1.0])),
            (2, ArrayData::Vec2f(vec![[0.0, 10.0], [1.0, 20.0]])),
        ]);
        let channel = AnimationChannel {
            name: "channel".into(),
            timestamps: DataArrayId(1),
            keyframes: DataArrayId(2),
            interpolation: InterpolationType::Linear,
            tangents_in: None,
            tangents_out: None,
        };
        (channel, arrays)
    }

    #[test]
    fn linear_sampling_between_keys() {
        let (channel, arrays) = linear_channel();
        for (time, expected) in [
            (0.0, [0.0, 10.0]),
            (0.1, [0.1, 11.0]),
            (0.5, [0.5, 15.0]),
            (0.9, [0.9, 19.0]),
            (1.0, [1.0, 20.0]),
        ] {
            let value = sample_channel(&channel, time, &arrays).unwrap();
            match value {
                PropertyValue::Vec2f(v) => {
                    assert!((v[0] - expected[0]).abs() < 1e-5, "time {time}");
                    assert!((v[1] - expected[1]).abs() < 1e-4, "time {time}");
                }
                other => panic!("unexpected value {other:?}"),
            }
        }
    }

    #[test]
    fn sampling_clamps_outside_the_range() {
        let (channel, arrays) = linear_channel();
        assert_eq!(
            sample_channel(&channel, 5.0, &arrays).unwrap(),
            PropertyValue::Vec2f([1.0, 20.0])
        );
        assert_eq!(
            sample_channel(&channel, -1.0, &arrays).unwrap(),
            PropertyValue::Vec2f([0.0, 10.0])
        );
    }

    #[test]
    fn step_holds_the_lower_key() {
        let (mut channel, arrays) = linear_channel();
        channel.interpolation = InterpolationType::Step;
        assert_eq!(
            sample_channel(&channel, 0.9, &arrays).unwrap(),
            PropertyValue::Vec2f([0.0, 10.0])
        );
        assert_eq!(
            sample_channel(&channel, 1.0, &arrays).unwrap(),
            PropertyValue::Vec2f([1.0, 20.0])
        );
    }

    #[test]
    fn integer_channels_round_componentwise() {
        let arrays = arrays_with(vec![
            (1, ArrayData::Float(vec![0.0, 1.0])),
            (2, ArrayData::Vec2i(vec![[0, 10], [1, 21]])),
        ]);
        let channel = AnimationChannel {
            name: "ints".into(),
            timestamps: DataArrayId(1),
            keyframes: DataArrayId(2),
            interpolation: InterpolationType::Linear,
            tangents_in: None,
            tangents_out: None,
        };
        // 0.5 * 11 = 5.5 -> rounds away from zero to 6; 0.5 -> 1.
        assert_eq!(
            sample_channel(&channel, 0.5, &arrays).unwrap(),
            PropertyValue::Vec2i([1, 16])
        );
    }

    #[test]
    fn cubic_interpolation_passes_through_the_keys() {
        let arrays = arrays_with(vec![
            (1, ArrayData::Float(vec![0.0, 2.0])),
            (2, ArrayData::Float(vec![1.0, 5.0])),
            (3, ArrayData::Float(vec![0.0, 0.0])),
        ]);
        let channel = AnimationChannel {
            name: "cubic".into(),
            timestamps: DataArrayId(1),
            keyframes: DataArrayId(2),
            interpolation: InterpolationType::Cubic,
            tangents_in: Some(DataArrayId(3)),
            tangents_out: Some(DataArrayId(3)),
        };
        let at = |time: f32| match sample_channel(&channel, time, &arrays).unwrap() {
            PropertyValue::Float(v) => v,
            other => panic!("unexpected value {other:?}"),
        };
        assert!((at(0.0) - 1.0).abs() < 1e-6);
        assert!((at(2.0) - 5.0).abs() < 1e-6);
        // Zero tangents make the midpoint the Hermite average.
        assert!((at(1.0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn cubic_with_tangents_uses_segment_scaling() {
        // One segment of duration 2 with out/in tangents 1 per second:
        // h10(0.5) * m0 + h11(0.5) * m1 with m = 2 * tangent.
        let arrays = arrays_with(vec![
            (1, ArrayData::Float(vec![0.0, 2.0])),
            (2, ArrayData::Float(vec![0.0, 0.0])),
            (3, ArrayData::Float(vec![1.0, 1.0])),
        ]);
        let channel = AnimationChannel {
            name: "tangents".into(),
            timestamps: DataArrayId(1),
            keyframes: DataArrayId(2),
            interpolation: InterpolationType::Cubic,
            tangents_in: Some(DataArrayId(3)),
            tangents_out: Some(DataArrayId(3)),
        };
        let value = match sample_channel(&channel, 1.0, &arrays).unwrap() {
            PropertyValue::Float(v) => v,
            other => panic!("unexpected value {other:?}"),
        };
        // h10(0.5) = 0.125, h11(0.5) = -0.125, so 2 * (0.125 - 0.125) = 0,
        // plus the key contributions which are zero.
        assert!(value.abs() < 1e-6);
    }

    #[test]
    fn quaternion_results_are_normalized() {
        let arrays = arrays_with(vec![
            (1, ArrayData::Float(vec![0.0, 1.0])),
            (
                2,
                ArrayData::Vec4f(vec![[0.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 0.0]]),
            ),
        ]);
        let channel = AnimationChannel {
            name: "rotation".into(),
            timestamps: DataArrayId(1),
            keyframes: DataArrayId(2),
            interpolation: InterpolationType::LinearQuaternion,
            tangents_in: None,
            tangents_out: None,
        };
        let value = match sample_channel(&channel, 0.5, &arrays).unwrap() {
            PropertyValue::Vec4f(q) => q,
            other => panic!("unexpected value {other:?}"),
        };
        let norm: f32 = value.iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
