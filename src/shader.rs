//! Shader stage masks, as seen by descriptor set and pipeline layouts.

crate::macros::bitflags_type! {
    /// A set of shader stages that may access a binding.
    ShaderStages = u32;

    /// The vertex shader stage.
    VERTEX = 1 << 0,

    /// The tessellation control shader stage.
    TESSELLATION_CONTROL = 1 << 1,

    /// The tessellation evaluation shader stage.
    TESSELLATION_EVALUATION = 1 << 2,

    /// The geometry shader stage.
    GEOMETRY = 1 << 3,

    /// The fragment shader stage.
    FRAGMENT = 1 << 4,

    /// The compute shader stage.
    COMPUTE = 1 << 5,
}

impl ShaderStages {
    /// Returns a `ShaderStages` with all the graphics stages set.
    #[inline]
    pub const fn all_graphics() -> Self {
        Self::VERTEX
            .union(Self::TESSELLATION_CONTROL)
            .union(Self::TESSELLATION_EVALUATION)
            .union(Self::GEOMETRY)
            .union(Self::FRAGMENT)
    }
}
