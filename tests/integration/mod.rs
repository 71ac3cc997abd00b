//! Integration tests for the patch sets shipped in `patches/`.

mod medical_desk_patches;
