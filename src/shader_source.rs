//! WGSL assembly.
//!
//! Shader files are embedded at compile time and concatenated per program.
//! `${name}` placeholders are replaced from [`ShaderConstants`]; a placeholder
//! with no entry in the table is an [`Error::Shader`], never left in place.

use std::collections::BTreeMap;

use crate::bvh::TRAVERSAL_STACK_SIZE;
use crate::pipeline::{PipelineVariant, PATH_WORKGROUP, PIXEL_WORKGROUP, SCAN_BLOCK};
use crate::util::{Error, Result};

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const SAMPLER_WGSL: &str = include_str!("shaders/sampler.wgsl");
const INTERSECTION_WGSL: &str = include_str!("shaders/intersection.wgsl");
const INTEGRATOR_WGSL: &str = include_str!("shaders/integrator.wgsl");
const PATHTRACER_CS_WGSL: &str = include_str!("shaders/pathtracer.cs.wgsl");
const COMPACTION_CS_WGSL: &str = include_str!("shaders/compaction.cs.wgsl");
const PRESENT_WGSL: &str = include_str!("shaders/present.wgsl");

/// Bind group indices shared by every compute program.
pub const GROUP_FRAME: u32 = 0;
pub const GROUP_PATHTRACER: u32 = 1;
pub const GROUP_GEOMETRY: u32 = 2;
pub const GROUP_MATERIALS: u32 = 3;
/// Compaction programs put their scratch buffers where geometry would go.
pub const GROUP_COMPACTION: u32 = 2;

/// Compiled program kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    /// clearRadiance, generateRay, computeIntersections, integrate, finalGather.
    PathTracer,
    /// generateFlags, scanBlocks, scanBlockSums, addBlockOffsets, compactPaths.
    Compaction,
    /// Fullscreen tone-mapping blit.
    Present,
}

impl Program {
    fn parts(self) -> &'static [&'static str] {
        match self {
            Program::PathTracer => &[
                COMMON_WGSL,
                SAMPLER_WGSL,
                INTERSECTION_WGSL,
                INTEGRATOR_WGSL,
                PATHTRACER_CS_WGSL,
            ],
            Program::Compaction => &[COMMON_WGSL, COMPACTION_CS_WGSL],
            Program::Present => &[PRESENT_WGSL],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Program::PathTracer => "pathtracer_cs",
            Program::Compaction => "compaction_cs",
            Program::Present => "present",
        }
    }
}

/// Typed placeholder table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderConstants {
    pub variant: PipelineVariant,
    /// Present writes sRGB-encoded values itself (non-sRGB target).
    pub encode_srgb: bool,
}

impl ShaderConstants {
    pub fn new(variant: PipelineVariant) -> Self {
        Self {
            variant,
            encode_srgb: false,
        }
    }

    pub fn table(&self) -> BTreeMap<&'static str, String> {
        let mut t = BTreeMap::new();
        t.insert("group_frame", GROUP_FRAME.to_string());
        t.insert("group_pathtracer", GROUP_PATHTRACER.to_string());
        t.insert("group_geometry", GROUP_GEOMETRY.to_string());
        t.insert("group_materials", GROUP_MATERIALS.to_string());
        t.insert("group_compaction", GROUP_COMPACTION.to_string());
        t.insert("pixel_workgroup", PIXEL_WORKGROUP.to_string());
        t.insert("path_workgroup", PATH_WORKGROUP.to_string());
        t.insert("scan_block", SCAN_BLOCK.to_string());
        t.insert("bvh_stack_size", TRAVERSAL_STACK_SIZE.to_string());
        t.insert("compact_paths", self.variant.compacts().to_string());
        t.insert("encode_srgb", self.encode_srgb.to_string());
        t
    }
}

/// Replace every `${name}` in `src` with its table entry.
pub fn substitute(src: &str, table: &BTreeMap<&'static str, String>) -> Result<String> {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(pos) = rest.find("${") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let end = after.find('}').ok_or_else(|| {
            Error::Shader(format!("unterminated placeholder near `{}`", snippet(after)))
        })?;
        let name = &after[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Shader(format!("malformed placeholder `${{{name}}}`")));
        }
        let value = table
            .get(name)
            .ok_or_else(|| Error::Shader(format!("unknown placeholder `${{{name}}}`")))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn snippet(s: &str) -> &str {
    let end = s.char_indices().nth(24).map_or(s.len(), |(i, _)| i);
    &s[..end]
}

/// Concatenate and substitute the sources of `program`.
pub fn assemble(program: Program, constants: &ShaderConstants) -> Result<String> {
    let table = constants.table();
    let mut out = String::new();
    for part in program.parts() {
        out.push_str(&substitute(part, &table)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_known() {
        let mut t = BTreeMap::new();
        t.insert("a", "1".to_string());
        t.insert("b_2", "x".to_string());
        assert_eq!(substitute("${a} + ${b_2}u", &t).unwrap(), "1 + xu");
        assert_eq!(substitute("no placeholders", &t).unwrap(), "no placeholders");
    }

    #[test]
    fn test_substitute_rejects_unknown() {
        let t = BTreeMap::new();
        let err = substitute("let x = ${missing};", &t).unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(substitute("${unterminated", &t).is_err());
        assert!(substitute("${a b}", &t).is_err());
    }

    #[test]
    fn test_every_program_resolves() {
        for variant in [PipelineVariant::FullGrid, PipelineVariant::StreamCompaction] {
            let constants = ShaderConstants::new(variant);
            for program in [Program::PathTracer, Program::Compaction, Program::Present] {
                let src = assemble(program, &constants).unwrap();
                assert!(!src.contains("${"), "{} left a placeholder", program.label());
            }
        }
    }

    #[test]
    fn test_variant_flag_reaches_source() {
        let compact = ShaderConstants::new(PipelineVariant::StreamCompaction);
        let src = assemble(Program::PathTracer, &compact).unwrap();
        assert!(src.contains("const COMPACT_PATHS: bool = true;"));
        let full = ShaderConstants::new(PipelineVariant::FullGrid);
        let src = assemble(Program::PathTracer, &full).unwrap();
        assert!(src.contains("const COMPACT_PATHS: bool = false;"));
    }

    #[test]
    fn test_entry_points_present() {
        let constants = ShaderConstants::new(PipelineVariant::FullGrid);
        let pt = assemble(Program::PathTracer, &constants).unwrap();
        let pt_entries =
            ["clearRadiance", "generateRay", "computeIntersections", "integrate", "finalGather"];
        for entry in pt_entries {
            assert!(pt.contains(&format!("fn {entry}(")), "missing {entry}");
        }
        let cs = assemble(Program::Compaction, &constants).unwrap();
        let cs_entries =
            ["generateFlags", "scanBlocks", "scanBlockSums", "addBlockOffsets", "compactPaths"];
        for entry in cs_entries {
            assert!(cs.contains(&format!("fn {entry}(")), "missing {entry}");
        }
    }

    #[test]
    fn test_stack_size_matches_traversal_limit() {
        let constants = ShaderConstants::new(PipelineVariant::FullGrid);
        let src = assemble(Program::PathTracer, &constants).unwrap();
        let expected = format!("const BVH_STACK_SIZE: u32 = {TRAVERSAL_STACK_SIZE}u;");
        assert!(src.contains(&expected));
    }
}
