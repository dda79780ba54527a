mod lifecycle;
mod pipeline;
mod support;
