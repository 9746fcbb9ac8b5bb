//! Temperature-compensated calibration: bias, misalignment, scale, then
//! the board mounting rotation.

use core::f32::consts::PI;

use micromath::vector::F32x3;
use micromath::F32Ext;
use num_enum::FromPrimitive;

/// Named entries of the external calibration parameter table.
///
/// `*0` terms are constants; `*1..*3` multiply T, T² and T³.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Param {
    BiasX0,
    BiasX1,
    BiasX2,
    BiasX3,
    BiasY0,
    BiasY1,
    BiasY2,
    BiasY3,
    BiasZ0,
    BiasZ1,
    BiasZ2,
    BiasZ3,
    AlignXY,
    AlignXZ,
    AlignYX,
    AlignYZ,
    AlignZX,
    AlignZY,
    ScaleX0,
    ScaleX1,
    ScaleX2,
    ScaleX3,
    ScaleY0,
    ScaleY1,
    ScaleY2,
    ScaleY3,
    ScaleZ0,
    ScaleZ1,
    ScaleZ2,
    ScaleZ3,
    /// Board mounting, see [`Flip`].
    Flip,
    /// Mounting rotation about Z, degrees.
    Rotation,
}

/// Number of [`Param`] entries.
pub const PARAM_COUNT: usize = Param::Rotation as usize + 1;

const BIAS: [[Param; 4]; 3] = [
    [Param::BiasX0, Param::BiasX1, Param::BiasX2, Param::BiasX3],
    [Param::BiasY0, Param::BiasY1, Param::BiasY2, Param::BiasY3],
    [Param::BiasZ0, Param::BiasZ1, Param::BiasZ2, Param::BiasZ3],
];

const SCALE: [[Param; 4]; 3] = [
    [Param::ScaleX0, Param::ScaleX1, Param::ScaleX2, Param::ScaleX3],
    [Param::ScaleY0, Param::ScaleY1, Param::ScaleY2, Param::ScaleY3],
    [Param::ScaleZ0, Param::ScaleZ1, Param::ScaleZ2, Param::ScaleZ3],
];

/// Read-only source of calibration parameters.
pub trait ParamStore {
    fn param(&self, param: Param) -> f32;
}

impl ParamStore for [f32; PARAM_COUNT] {
    fn param(&self, param: Param) -> f32 {
        self[param as usize]
    }
}

impl<S: ParamStore + ?Sized> ParamStore for &S {
    fn param(&self, param: Param) -> f32 {
        (**self).param(param)
    }
}

/// How the sensor is mounted on the board. Unknown codes mean
/// [`Flip::Normal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Flip {
    #[num_enum(default)]
    Normal = 0,
    /// Upside down about X.
    AboutX = 1,
    /// Upside down about Y.
    AboutY = 2,
}

impl Flip {
    /// Per-axis orientation signs.
    pub const fn signs(self) -> [f32; 3] {
        match self {
            Flip::Normal => [1.0, 1.0, 1.0],
            Flip::AboutX => [1.0, -1.0, -1.0],
            Flip::AboutY => [-1.0, 1.0, -1.0],
        }
    }

    fn from_param(value: f32) -> Self {
        if !(0.0..=f32::from(u8::MAX)).contains(&value) {
            return Flip::Normal;
        }
        Flip::from_primitive(value as u8)
    }
}

/// Cubic in temperature, `c0 + c1·T + c2·T² + c3·T³`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TempPoly(pub [f32; 4]);

impl TempPoly {
    pub const fn constant(c0: f32) -> Self {
        Self([c0, 0.0, 0.0, 0.0])
    }

    #[inline]
    pub fn eval(&self, t: f32) -> f32 {
        let [c0, c1, c2, c3] = self.0;
        c0 + t * (c1 + t * (c2 + t * c3))
    }
}

/// Off-diagonal cross-axis coupling terms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Alignment {
    pub xy: f32,
    pub xz: f32,
    pub yx: f32,
    pub yz: f32,
    pub zx: f32,
    pub zy: f32,
}

/// Precomputed mounting rotation about Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub cos: f32,
    pub sin: f32,
}

impl Rotation {
    pub const IDENTITY: Self = Self { cos: 1.0, sin: 0.0 };

    pub fn from_degrees(degrees: f32) -> Self {
        let rad = degrees * (PI / 180.0);
        Self { cos: rad.cos(), sin: rad.sin() }
    }
}

/// Everything needed to turn averaged counts into calibrated gauss.
///
/// Loaded once at sensor init and then only read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationModel {
    pub bias: [TempPoly; 3],
    pub alignment: Alignment,
    pub scale: [TempPoly; 3],
    pub rotation: Rotation,
    pub flip: Flip,
}

impl CalibrationModel {
    /// Zero bias, unit scale, no coupling, no rotation.
    pub const IDENTITY: Self = Self {
        bias: [TempPoly([0.0; 4]); 3],
        alignment: Alignment {
            xy: 0.0,
            xz: 0.0,
            yx: 0.0,
            yz: 0.0,
            zx: 0.0,
            zy: 0.0,
        },
        scale: [TempPoly::constant(1.0); 3],
        rotation: Rotation::IDENTITY,
        flip: Flip::Normal,
    };

    pub fn load<S: ParamStore + ?Sized>(store: &S) -> Self {
        let poly = |names: &[Param; 4]| {
            TempPoly([
                store.param(names[0]),
                store.param(names[1]),
                store.param(names[2]),
                store.param(names[3]),
            ])
        };
        Self {
            bias: [poly(&BIAS[0]), poly(&BIAS[1]), poly(&BIAS[2])],
            alignment: Alignment {
                xy: store.param(Param::AlignXY),
                xz: store.param(Param::AlignXZ),
                yx: store.param(Param::AlignYX),
                yz: store.param(Param::AlignYZ),
                zx: store.param(Param::AlignZX),
                zy: store.param(Param::AlignZY),
            },
            scale: [poly(&SCALE[0]), poly(&SCALE[1]), poly(&SCALE[2])],
            rotation: Rotation::from_degrees(store.param(Param::Rotation)),
            flip: Flip::from_param(store.param(Param::Flip)),
        }
    }

    /// Full pipeline at temperature `t`.
    pub fn apply(&self, v: F32x3, t: f32) -> F32x3 {
        self.rotate(self.apply_scale(self.align(self.apply_bias(v, t)), t))
    }

    /// Add the temperature-dependent bias. The Z bias enters with the
    /// opposite sign: the sensor's Z axis is wired inverted and `v` already
    /// has that inversion applied.
    pub fn apply_bias(&self, v: F32x3, t: f32) -> F32x3 {
        F32x3 {
            x: v.x + self.bias[0].eval(t),
            y: v.y + self.bias[1].eval(t),
            z: v.z - self.bias[2].eval(t),
        }
    }

    pub fn align(&self, v: F32x3) -> F32x3 {
        let m = &self.alignment;
        F32x3 {
            x: v.x + v.y * m.xy + v.z * m.xz,
            y: v.x * m.yx + v.y + v.z * m.yz,
            z: v.x * m.zx + v.y * m.zy + v.z,
        }
    }

    pub fn apply_scale(&self, v: F32x3, t: f32) -> F32x3 {
        F32x3 {
            x: v.x / self.scale[0].eval(t),
            y: v.y / self.scale[1].eval(t),
            z: v.z / self.scale[2].eval(t),
        }
    }

    pub fn rotate(&self, v: F32x3) -> F32x3 {
        let Rotation { cos, sin } = self.rotation;
        F32x3 {
            x: v.x * cos - v.y * sin,
            y: v.y * cos + v.x * sin,
            z: v.z,
        }
    }
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn v(x: f32, y: f32, z: f32) -> F32x3 {
        F32x3 { x, y, z }
    }

    fn identity_store() -> [f32; PARAM_COUNT] {
        let mut store = [0.0; PARAM_COUNT];
        store[Param::ScaleX0 as usize] = 1.0;
        store[Param::ScaleY0 as usize] = 1.0;
        store[Param::ScaleZ0 as usize] = 1.0;
        store
    }

    #[test]
    fn neutral_parameters_are_identity() {
        let model = CalibrationModel::load(&identity_store());
        for t in [-20.0, 0.0, 25.0, 60.0] {
            let input = v(0.31, -0.12, 0.47);
            let out = model.apply_scale(model.align(model.apply_bias(input, t)), t);
            assert_eq!(out, input);
        }
    }

    #[test]
    fn zero_rotation_leaves_xy_unchanged() {
        let model = CalibrationModel::IDENTITY;
        let out = model.rotate(v(3.0, -4.0, 5.0));
        assert_eq!(out, v(3.0, -4.0, 5.0));
    }

    #[test]
    fn quarter_turn_maps_x_to_y() {
        let model = CalibrationModel {
            rotation: Rotation { cos: 0.0, sin: 1.0 },
            ..CalibrationModel::IDENTITY
        };
        let out = model.rotate(v(3.0, -4.0, 5.0));
        assert_eq!(out, v(4.0, 3.0, 5.0));
    }

    #[test]
    fn rotation_loads_from_degrees() {
        let mut store = identity_store();
        store[Param::Rotation as usize] = 90.0;
        let model = CalibrationModel::load(&store);
        assert_relative_eq!(model.rotation.cos, 0.0, epsilon = 1e-2);
        assert_relative_eq!(model.rotation.sin, 1.0, epsilon = 1e-2);
    }

    #[test]
    fn bias_follows_temperature_and_z_is_inverted() {
        let mut store = identity_store();
        store[Param::BiasX0 as usize] = 0.5;
        store[Param::BiasX1 as usize] = 0.1;
        store[Param::BiasY2 as usize] = 0.01;
        store[Param::BiasZ0 as usize] = 0.25;
        store[Param::BiasZ3 as usize] = 0.001;
        let model = CalibrationModel::load(&store);

        let out = model.apply_bias(v(1.0, 1.0, 1.0), 2.0);
        assert_relative_eq!(out.x, 1.0 + 0.5 + 0.2, epsilon = 1e-6);
        assert_relative_eq!(out.y, 1.0 + 0.04, epsilon = 1e-6);
        assert_relative_eq!(out.z, 1.0 - (0.25 + 0.008), epsilon = 1e-6);
    }

    #[test]
    fn alignment_couples_axes() {
        let model = CalibrationModel {
            alignment: Alignment { xy: 0.1, xz: 0.2, yx: 0.3, yz: 0.4, zx: 0.5, zy: 0.6 },
            ..CalibrationModel::IDENTITY
        };
        let out = model.align(v(1.0, 2.0, 3.0));
        assert_relative_eq!(out.x, 1.0 + 0.2 + 0.6, epsilon = 1e-6);
        assert_relative_eq!(out.y, 0.3 + 2.0 + 1.2, epsilon = 1e-6);
        assert_relative_eq!(out.z, 0.5 + 1.2 + 3.0, epsilon = 1e-6);
    }

    #[test]
    fn scale_divides_by_temperature_polynomial() {
        let mut store = identity_store();
        store[Param::ScaleX0 as usize] = 2.0;
        store[Param::ScaleY1 as usize] = 0.5;
        let model = CalibrationModel::load(&store);
        let out = model.apply_scale(v(4.0, 4.0, 4.0), 2.0);
        assert_relative_eq!(out.x, 2.0, epsilon = 1e-6);
        assert_relative_eq!(out.y, 2.0, epsilon = 1e-6);
        assert_relative_eq!(out.z, 4.0, epsilon = 1e-6);
    }

    #[test]
    fn flip_codes_map_to_signs() {
        assert_eq!(Flip::from_param(0.0).signs(), [1.0, 1.0, 1.0]);
        assert_eq!(Flip::from_param(1.0).signs(), [1.0, -1.0, -1.0]);
        assert_eq!(Flip::from_param(2.0).signs(), [-1.0, 1.0, -1.0]);
        assert_eq!(Flip::from_param(7.0), Flip::Normal);
        assert_eq!(Flip::from_param(-1.0), Flip::Normal);
    }
}
