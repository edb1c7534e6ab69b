//! The colour combiner and the blender.
//!
//! Every cycle, the combiner computes `(a - b) * c + d` separately for the colour and the alpha
//! channels. Each of the four inputs picks from a slot-specific set of sources.
use bitos::bitos;

/// An input of the combiner equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    /// Output of the first cycle.
    Combined,
    Tex0,
    Tex1,
    Primitive,
    Shade,
    Environment,
    One,
    Zero,
    Noise,
    KeyCenter,
    KeyScale,
    ConvertK4,
    ConvertK5,
    CombinedAlpha,
    Tex0Alpha,
    Tex1Alpha,
    PrimitiveAlpha,
    ShadeAlpha,
    EnvironmentAlpha,
    LodFraction,
    PrimitiveLodFraction,
}

/// Position of an input in the equation, for one of the channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    RgbA,
    RgbB,
    RgbC,
    RgbD,
    AlphaA,
    AlphaB,
    AlphaC,
    AlphaD,
}

impl Input {
    /// Hardware encoding of the input in `slot`, if the slot offers it.
    pub fn encode(self, slot: Slot) -> Option<u8> {
        use Input::*;
        use Slot::*;

        let common = match self {
            Combined => Some(0),
            Tex0 => Some(1),
            Tex1 => Some(2),
            Primitive => Some(3),
            Shade => Some(4),
            Environment => Some(5),
            _ => None,
        };

        match slot {
            RgbA => common.or(match self {
                One => Some(6),
                Noise => Some(7),
                Zero => Some(8),
                _ => None,
            }),
            RgbB => common.or(match self {
                KeyCenter => Some(6),
                ConvertK4 => Some(7),
                Zero => Some(8),
                _ => None,
            }),
            RgbC => common.or(match self {
                KeyScale => Some(6),
                CombinedAlpha => Some(7),
                Tex0Alpha => Some(8),
                Tex1Alpha => Some(9),
                PrimitiveAlpha => Some(10),
                ShadeAlpha => Some(11),
                EnvironmentAlpha => Some(12),
                LodFraction => Some(13),
                PrimitiveLodFraction => Some(14),
                ConvertK5 => Some(15),
                Zero => Some(16),
                _ => None,
            }),
            RgbD | AlphaA | AlphaB | AlphaD => common.or(match self {
                One => Some(6),
                Zero => Some(7),
                _ => None,
            }),
            AlphaC => match self {
                LodFraction => Some(0),
                Tex0 => Some(1),
                Tex1 => Some(2),
                Primitive => Some(3),
                Shade => Some(4),
                Environment => Some(5),
                PrimitiveLodFraction => Some(6),
                Zero => Some(7),
                _ => None,
            },
        }
    }
}

/// `(a - b) * c + d`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Equation {
    pub a: Input,
    pub b: Input,
    pub c: Input,
    pub d: Input,
}

impl Equation {
    pub const fn new(a: Input, b: Input, c: Input, d: Input) -> Self {
        Self { a, b, c, d }
    }

    /// Passes `input` through unchanged.
    pub const fn only(input: Input) -> Self {
        Self::new(Input::Zero, Input::Zero, Input::Zero, input)
    }

    /// `a * b`
    pub const fn mul(a: Input, b: Input) -> Self {
        Self::new(a, Input::Zero, b, Input::Zero)
    }
}

/// One cycle of the combiner: the colour and the alpha equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CombinePass {
    pub rgb: Equation,
    pub alpha: Equation,
}

impl CombinePass {
    /// Flat primitive colour.
    pub const PRIMITIVE: Self = Self {
        rgb: Equation::only(Input::Primitive),
        alpha: Equation::only(Input::Primitive),
    };

    /// Texture as is.
    pub const TEXTURE: Self = Self {
        rgb: Equation::only(Input::Tex0),
        alpha: Equation::only(Input::Tex0),
    };

    /// Texture tinted by the primitive colour.
    pub const TEXTURE_PRIMITIVE: Self = Self {
        rgb: Equation::mul(Input::Tex0, Input::Primitive),
        alpha: Equation::mul(Input::Tex0, Input::Primitive),
    };

    /// Interpolated vertex colour.
    pub const SHADE: Self = Self {
        rgb: Equation::only(Input::Shade),
        alpha: Equation::only(Input::Shade),
    };
}

/// Combiner configuration for one or two cycle mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineMode {
    One(CombinePass),
    Two(CombinePass, CombinePass),
}

impl Default for CombineMode {
    fn default() -> Self {
        Self::One(CombinePass::PRIMITIVE)
    }
}

/// Packs `value` into `width` bits at `shift`.
fn field(value: u8, shift: u32, width: u32) -> u64 {
    debug_assert!(u32::from(value) < 1 << width);
    u64::from(value) << shift
}

fn slot(input: Input, slot: Slot) -> u8 {
    match input.encode(slot) {
        Some(value) => value,
        None => panic!("rdp: {input:?} can't feed combiner slot {slot:?}"),
    }
}

impl CombineMode {
    /// The 56 bits of the set combine mode command.
    ///
    /// # Panics
    /// Panics if an input isn't available in its slot.
    pub fn to_bits(self) -> u64 {
        // one cycle mode runs the same pass twice
        let (first, second) = match self {
            Self::One(pass) => (pass, pass),
            Self::Two(first, second) => (first, second),
        };

        let (c0, a0) = (first.rgb, first.alpha);
        let (c1, a1) = (second.rgb, second.alpha);

        field(slot(c0.a, Slot::RgbA), 52, 4)
            | field(slot(c0.c, Slot::RgbC), 47, 5)
            | field(slot(a0.a, Slot::AlphaA), 44, 3)
            | field(slot(a0.c, Slot::AlphaC), 41, 3)
            | field(slot(c1.a, Slot::RgbA), 37, 4)
            | field(slot(c1.c, Slot::RgbC), 32, 5)
            | field(slot(c0.b, Slot::RgbB), 28, 4)
            | field(slot(c1.b, Slot::RgbB), 24, 4)
            | field(slot(a1.a, Slot::AlphaA), 21, 3)
            | field(slot(a1.c, Slot::AlphaC), 18, 3)
            | field(slot(c0.d, Slot::RgbD), 15, 3)
            | field(slot(a0.b, Slot::AlphaB), 12, 3)
            | field(slot(a0.d, Slot::AlphaD), 9, 3)
            | field(slot(c1.d, Slot::RgbD), 6, 3)
            | field(slot(a1.b, Slot::AlphaB), 3, 3)
            | field(slot(a1.d, Slot::AlphaD), 0, 3)
    }
}

/// First colour operand of the blender.
#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendColor {
    #[default]
    Combined = 0,
    Memory = 1,
    Blend = 2,
    Fog = 3,
}

/// Weight of the first operand.
#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendAlpha {
    #[default]
    CombinedAlpha = 0,
    FogAlpha = 1,
    ShadeAlpha = 2,
    Zero = 3,
}

/// Weight of the second operand.
#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendWeight {
    #[default]
    OneMinusAlpha = 0,
    MemoryAlpha = 1,
    One = 2,
    Zero = 3,
}

/// The blender equation for both cycles: `(p * a + m * b) / (a + b)`.
#[bitos(16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendMode {
    #[bits(0..2)]
    pub b1: BlendWeight,
    #[bits(2..4)]
    pub b0: BlendWeight,
    #[bits(4..6)]
    pub m1: BlendColor,
    #[bits(6..8)]
    pub m0: BlendColor,
    #[bits(8..10)]
    pub a1: BlendAlpha,
    #[bits(10..12)]
    pub a0: BlendAlpha,
    #[bits(12..14)]
    pub p1: BlendColor,
    #[bits(14..16)]
    pub p0: BlendColor,
}

impl BlendMode {
    /// Standard alpha blending against the frame buffer, in both cycles.
    pub fn alpha() -> Self {
        Self::default()
            .with_p0(BlendColor::Combined)
            .with_a0(BlendAlpha::CombinedAlpha)
            .with_m0(BlendColor::Memory)
            .with_b0(BlendWeight::OneMinusAlpha)
            .with_p1(BlendColor::Combined)
            .with_a1(BlendAlpha::CombinedAlpha)
            .with_m1(BlendColor::Memory)
            .with_b1(BlendWeight::OneMinusAlpha)
    }
}
