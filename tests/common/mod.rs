#![allow(dead_code)]

pub mod blobs;
pub mod registry;
pub mod rootfs;
