mod backup;
mod lifecycle;
