pub(crate) mod mesh;
pub(crate) mod probes;
