//! Shader assembly with naga_oil.
//!
//! Shared WGSL lives in composable modules that start with `#define_import_path`
//! and are pulled into kernels with `#import`. Constants owned by Rust are
//! passed as shader defs and substituted wherever a module writes `#{NAME}`.

use std::collections::HashMap;

use naga_oil::compose::{
    ComposableModuleDescriptor, Composer, ComposerError, NagaModuleDescriptor, ShaderDefValue,
};
use wgpu::naga;

use crate::{KernelError, Result, WORKGROUP_SIZE, shaders};

/// Modules and shader defs a kernel needs on top of `kernel::helpers`.
#[derive(Debug, Clone, Copy)]
pub struct ShaderImports {
    /// Composable modules, dependencies first.
    pub modules: &'static [&'static str],
    pub defs: &'static [(&'static str, u32)],
}

impl ShaderImports {
    pub const NONE: Self = Self {
        modules: &[],
        defs: &[],
    };

    fn shader_defs(&self) -> HashMap<String, ShaderDefValue> {
        [("WORKGROUP_SIZE", WORKGROUP_SIZE)]
            .into_iter()
            .chain(self.defs.iter().copied())
            .map(|(name, value)| (name.to_owned(), ShaderDefValue::UInt(value)))
            .collect()
    }
}

fn shader_error(composer: &Composer, label: &str, err: ComposerError) -> KernelError {
    KernelError::Shader {
        label: label.to_owned(),
        message: err.emit_to_string(composer),
    }
}

/// Composes `source` and everything it imports into one naga module.
pub fn compose_module(label: &str, source: &str, imports: &ShaderImports) -> Result<naga::Module> {
    let shader_defs = imports.shader_defs();
    let mut composer = Composer::default();

    let modules = std::iter::once(shaders::HELPERS).chain(imports.modules.iter().copied());
    for module in modules {
        let added = composer
            .add_composable_module(ComposableModuleDescriptor {
                source: module,
                file_path: label,
                shader_defs: shader_defs.clone(),
                ..Default::default()
            })
            .map(|_| ());
        if let Err(err) = added {
            return Err(shader_error(&composer, label, err));
        }
    }

    composer
        .make_naga_module(NagaModuleDescriptor {
            source,
            file_path: label,
            shader_defs,
            ..Default::default()
        })
        .map_err(|err| shader_error(&composer, label, err))
}

/// Byte size and member offsets of a struct as naga lays it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub size: u32,
    pub offsets: Vec<u32>,
}

/// Layout of the struct called `name`. Imported items get mangled names, so
/// compose the module that declares the struct.
pub fn struct_layout(module: &naga::Module, name: &str) -> Option<StructLayout> {
    module.types.iter().find_map(|(_, ty)| match &ty.inner {
        naga::TypeInner::Struct { members, span } if ty.name.as_deref() == Some(name) => {
            Some(StructLayout {
                size: *span,
                offsets: members.iter().map(|member| member.offset).collect(),
            })
        }
        _ => None,
    })
}
