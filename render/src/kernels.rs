use super::shaders::{IMPORTS, MAP_GAUSSIAN_TO_INTERSECTS, PREPROCESS, RASTERIZE, TILE_BOUNDARIES};
use kernel::{ComputeKernel, kernel_source_gen};
use prefix_sum::PrefixSum;
use sort::RadixSort;

kernel_source_gen!(
    ProjectSplats,
    "preprocess",
    PREPROCESS,
    IMPORTS,
    [Uniform, ReadOnly, ReadWrite, ReadWrite]
);
kernel_source_gen!(
    MapGaussiansToIntersects,
    "map_gaussian_to_intersects",
    MAP_GAUSSIAN_TO_INTERSECTS,
    IMPORTS,
    [Uniform, ReadOnly, ReadOnly, ReadWrite, ReadWrite, ReadWrite]
);
kernel_source_gen!(
    ClearBoundaries,
    "clear_boundaries",
    TILE_BOUNDARIES,
    IMPORTS,
    [Uniform, ReadOnly, ReadOnly, ReadWrite]
);
kernel_source_gen!(
    TileBoundaries,
    "tile_boundaries",
    TILE_BOUNDARIES,
    IMPORTS,
    [Uniform, ReadOnly, ReadOnly, ReadWrite]
);
kernel_source_gen!(
    Rasterize,
    "rasterize",
    RASTERIZE,
    IMPORTS,
    [Uniform, ReadOnly, ReadOnly, ReadOnly, ReadWrite]
);

/// Every pipeline a frame needs, compiled once per device.
pub(crate) struct RenderKernels {
    pub project: ComputeKernel,
    pub map_intersects: ComputeKernel,
    pub clear_boundaries: ComputeKernel,
    pub tile_boundaries: ComputeKernel,
    pub rasterize: ComputeKernel,
    pub scan: PrefixSum,
    pub sorter: RadixSort,
}

impl RenderKernels {
    pub fn new(device: &wgpu::Device) -> kernel::Result<Self> {
        Ok(Self {
            project: ProjectSplats::create(device)?,
            map_intersects: MapGaussiansToIntersects::create(device)?,
            clear_boundaries: ClearBoundaries::create(device)?,
            tile_boundaries: TileBoundaries::create(device)?,
            rasterize: Rasterize::create(device)?,
            scan: PrefixSum::new(device)?,
            sorter: RadixSort::new(device)?,
        })
    }
}
