pub(crate) mod recruit;
