fn main() {
    endpoint_profiles::run_cli();
}
