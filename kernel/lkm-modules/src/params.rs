//! Module parameters example.
//!
//! Load with e.g. `short_param=3 int_param=1 array_param=13,13`.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use lkm_core::pr_info;
use lkm_driver_api::{DriverError, KernelModule, ModuleContext, ModuleInfo, ParamDecl, ParamPerm};

/// Name of the `short` parameter.
pub const SHORT_PARAM: &str = "short_param";
/// Name of the `int` parameter.
pub const INT_PARAM: &str = "int_param";
/// Name of the `charp` parameter.
pub const STR_PARAM: &str = "str_param";
/// Name of the array parameter.
pub const ARRAY_PARAM: &str = "array_param";

/// Values the module was loaded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    /// `short_param`.
    pub short_param: i16,
    /// `int_param`.
    pub int_param: i32,
    /// `str_param`.
    pub str_param: String,
    /// `array_param`, always two elements.
    pub array_param: Vec<i32>,
    /// Number of `array_param` elements given at load time.
    pub array_argc: usize,
}

impl KernelModule for Params {
    const INFO: ModuleInfo = ModuleInfo {
        name: "params",
        author: crate::AUTHOR,
        description: "LKM Example Module Parameters",
        license: "GPL",
    };

    fn params() -> Vec<ParamDecl> {
        vec![
            ParamDecl::short(
                SHORT_PARAM,
                1,
                ParamPerm::S_IRUSR | ParamPerm::S_IWUSR | ParamPerm::S_IRGRP | ParamPerm::S_IWGRP,
                "A short integer",
            ),
            ParamDecl::int(
                INT_PARAM,
                128,
                ParamPerm::S_IRUSR | ParamPerm::S_IWUSR | ParamPerm::S_IRGRP | ParamPerm::S_IROTH,
                "An integer",
            ),
            ParamDecl::charp(STR_PARAM, "string", ParamPerm::empty(), "A character string"),
            ParamDecl::int_array(
                ARRAY_PARAM,
                &[128, 128],
                ParamPerm::empty(),
                "An array of integers",
            ),
        ]
    }

    fn init(ctx: &ModuleContext) -> Result<Self, DriverError> {
        let p = &ctx.params;
        let (array, argc) = p.int_array(ARRAY_PARAM).ok_or(DriverError::InvalidState)?;
        let this = Self {
            short_param: p.short(SHORT_PARAM).ok_or(DriverError::InvalidState)?,
            int_param: p.int(INT_PARAM).ok_or(DriverError::InvalidState)?,
            str_param: p.str(STR_PARAM).ok_or(DriverError::InvalidState)?.into(),
            array_param: array.to_vec(),
            array_argc: argc,
        };

        pr_info!("Hello World! Sent from '{}' module", Self::INFO.name);
        pr_info!("short_param is a short integer: {}", this.short_param);
        pr_info!("int_param is an integer: {}", this.int_param);
        pr_info!("str_param is a string: {}", this.str_param);
        for (i, v) in this.array_param.iter().enumerate() {
            pr_info!("array_param[{i}] = {v}");
        }
        pr_info!("Got {} arguments for array_param.", this.array_argc);
        Ok(this)
    }

    fn exit(self) {
        pr_info!("Goodbye World! Sent from '{}' module", Self::INFO.name);
    }
}
