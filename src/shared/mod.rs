pub mod fs_atomic;
