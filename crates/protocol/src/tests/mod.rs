mod round_flow_test;
